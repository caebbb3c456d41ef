//! Shared workloads and pool shapes for the Clotho benchmarks.

use clotho::{ExecutorResult, ManagedExecutor};

/// Pool configurations exercised by the benchmarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolShape {
    /// Fixed core threads over an unbounded FIFO
    Unbounded,
    /// Fixed core threads over a bounded FIFO
    Bounded(usize),
    /// No core threads and a direct-handoff queue
    Handoff,
}

impl PoolShape {
    /// Label used in benchmark ids.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unbounded => "unbounded",
            Self::Bounded(_) => "bounded",
            Self::Handoff => "handoff",
        }
    }

    /// Build an executor of this shape with `workers` threads.
    ///
    /// # Errors
    ///
    /// Returns the builder's error if the shape is invalid for `workers`.
    pub fn build(self, workers: usize) -> ExecutorResult<ManagedExecutor> {
        let builder = ManagedExecutor::builder()
            .name(format!("bench-{}", self.label()))
            .max_pool_size(workers);
        match self {
            Self::Unbounded => builder.core_pool_size(workers).unbounded_queue(),
            Self::Bounded(capacity) => builder
                .core_pool_size(workers)
                .queue_capacity(i64::try_from(capacity).unwrap_or(i64::MAX)),
            Self::Handoff => builder.core_pool_size(0).queue_capacity(0),
        }
        .build()
    }
}

/// Worker count used when a benchmark does not sweep it.
#[must_use]
pub fn default_workers() -> usize {
    num_cpus::get().clamp(2, 8)
}

/// Small CPU-bound workload.
#[must_use]
pub fn cpu_work(iterations: u64) -> u64 {
    let mut sum = 0_u64;
    for i in 0..iterations {
        sum = sum.wrapping_add(i.wrapping_mul(i));
    }
    sum
}
