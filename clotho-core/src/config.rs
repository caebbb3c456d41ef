//! Executor configuration and its builder.

use std::time::Duration;

use crate::context::ContextService;
use crate::error::{ExecutorError, ExecutorResult};
use crate::reject::RejectPolicy;

/// Requested capacity of the submission queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueCapacity {
    /// No capacity limit
    Unbounded,
    /// At most this many queued tasks; `0` means direct hand-off
    Bounded(usize),
}

impl QueueCapacity {
    /// Raw value interpreted as [`QueueCapacity::Unbounded`].
    pub const UNBOUNDED_SENTINEL: i64 = i32::MAX as i64;

    /// Interpret a raw signed capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::InvalidArgument`] for negative values.
    pub fn from_raw(raw: i64) -> ExecutorResult<Self> {
        if raw < 0 {
            return Err(ExecutorError::InvalidArgument(format!(
                "queue capacity must not be negative, got {raw}"
            )));
        }
        if raw >= Self::UNBOUNDED_SENTINEL {
            return Ok(Self::Unbounded);
        }
        usize::try_from(raw)
            .map(Self::Bounded)
            .map_err(|_| ExecutorError::InvalidArgument(format!("queue capacity {raw} does not fit")))
    }

    /// Pick the queue discipline for a pool with `core_pool_size` core threads.
    #[must_use]
    pub const fn select(self, core_pool_size: usize) -> QueueKind {
        match self {
            Self::Bounded(0) => QueueKind::DirectHandoff,
            Self::Unbounded if core_pool_size == 0 => QueueKind::DirectHandoff,
            Self::Unbounded => QueueKind::Unbounded,
            Self::Bounded(capacity) => QueueKind::Bounded(capacity),
        }
    }
}

impl TryFrom<i64> for QueueCapacity {
    type Error = ExecutorError;

    fn try_from(raw: i64) -> ExecutorResult<Self> {
        Self::from_raw(raw)
    }
}

/// Queue discipline actually used by a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Synchronous rendezvous: an offer succeeds only if a worker is waiting
    DirectHandoff,
    /// FIFO with no limit
    Unbounded,
    /// FIFO holding at most the given number of tasks
    Bounded(usize),
}

/// Construction parameters of a managed executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Executor name; worker threads are named after it
    pub name: String,
    /// Running time after which a task counts as hung (zero disables)
    pub hung_task_threshold: Duration,
    /// Tasks are expected to run long; hang detection is suppressed
    pub long_running_tasks: bool,
    /// Threads kept alive even when idle
    pub core_pool_size: usize,
    /// Upper bound on live worker threads
    pub max_pool_size: usize,
    /// Idle time after which threads above the core count exit
    pub keep_alive: Duration,
    /// Age after which a worker retires after its current task (zero disables)
    pub thread_lifetime: Duration,
    /// Submission queue capacity
    pub queue_capacity: QueueCapacity,
    /// Policy applied when admission fails
    pub reject_policy: RejectPolicy,
    /// Context captured at submit time and applied on the worker
    pub context_service: Option<ContextService>,
    /// Longest a submitter waits for a worker on a direct hand-off queue
    pub handoff_timeout: Duration,
    /// Stack size of worker threads (platform default when unset)
    pub thread_stack_size: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            name: "clotho".into(),
            hung_task_threshold: Duration::ZERO,
            long_running_tasks: false,
            core_pool_size: cpus,
            max_pool_size: cpus * 2,
            keep_alive: Duration::from_secs(60),
            thread_lifetime: Duration::ZERO,
            queue_capacity: QueueCapacity::Unbounded,
            reject_policy: RejectPolicy::Abort,
            context_service: None,
            handoff_timeout: Duration::from_secs(1),
            thread_stack_size: None,
        }
    }
}

impl ExecutorConfig {
    /// Start a builder from the defaults.
    #[must_use]
    pub fn builder() -> ExecutorConfigBuilder {
        ExecutorConfigBuilder::new()
    }

    /// Check the parameters against each other.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::InvalidArgument`] for an empty name, a zero
    /// maximum, or a maximum below the core size.
    pub fn validate(&self) -> ExecutorResult<()> {
        if self.name.is_empty() {
            return Err(ExecutorError::InvalidArgument("executor name must not be empty".into()));
        }
        if self.max_pool_size == 0 {
            return Err(ExecutorError::InvalidArgument("max pool size must be greater than zero".into()));
        }
        if self.max_pool_size < self.core_pool_size {
            return Err(ExecutorError::InvalidArgument(format!(
                "max pool size {} is below core pool size {}",
                self.max_pool_size, self.core_pool_size
            )));
        }
        Ok(())
    }

    /// Queue discipline implied by capacity and core size.
    #[must_use]
    pub const fn queue_kind(&self) -> QueueKind {
        self.queue_capacity.select(self.core_pool_size)
    }

    /// Effective per-thread hung threshold, `None` when detection is off.
    #[must_use]
    pub fn hung_threshold(&self) -> Option<Duration> {
        if self.long_running_tasks || self.hung_task_threshold.is_zero() {
            None
        } else {
            Some(self.hung_task_threshold)
        }
    }

    /// Effective thread lifetime cap, `None` when disabled.
    #[must_use]
    pub fn lifetime_cap(&self) -> Option<Duration> {
        if self.thread_lifetime.is_zero() {
            None
        } else {
            Some(self.thread_lifetime)
        }
    }
}

/// Builder for [`ExecutorConfig`].
#[derive(Debug, Clone)]
pub struct ExecutorConfigBuilder {
    config: ExecutorConfig,
    raw_capacity: Option<i64>,
}

impl ExecutorConfigBuilder {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ExecutorConfig::default(),
            raw_capacity: None,
        }
    }

    /// Set the executor name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the hung task threshold (zero disables detection).
    #[must_use]
    pub fn hung_task_threshold(mut self, threshold: Duration) -> Self {
        self.config.hung_task_threshold = threshold;
        self
    }

    /// Mark the executor as running long tasks.
    #[must_use]
    pub fn long_running_tasks(mut self, long_running: bool) -> Self {
        self.config.long_running_tasks = long_running;
        self
    }

    /// Set the core pool size.
    #[must_use]
    pub fn core_pool_size(mut self, size: usize) -> Self {
        self.config.core_pool_size = size;
        self
    }

    /// Set the maximum pool size.
    #[must_use]
    pub fn max_pool_size(mut self, size: usize) -> Self {
        self.config.max_pool_size = size;
        self
    }

    /// Set the idle keep-alive.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    /// Set the thread lifetime cap (zero disables).
    #[must_use]
    pub fn thread_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.thread_lifetime = lifetime;
        self
    }

    /// Set the queue capacity from a raw signed value; validated by [`build`](Self::build).
    #[must_use]
    pub fn queue_capacity(mut self, raw: i64) -> Self {
        self.raw_capacity = Some(raw);
        self
    }

    /// Use an unbounded queue.
    #[must_use]
    pub fn unbounded_queue(mut self) -> Self {
        self.raw_capacity = None;
        self.config.queue_capacity = QueueCapacity::Unbounded;
        self
    }

    /// Set the rejection policy.
    #[must_use]
    pub fn reject_policy(mut self, policy: RejectPolicy) -> Self {
        self.config.reject_policy = policy;
        self
    }

    /// Set the context service.
    #[must_use]
    pub fn context_service(mut self, service: ContextService) -> Self {
        self.config.context_service = Some(service);
        self
    }

    /// Set the direct hand-off wait.
    #[must_use]
    pub fn handoff_timeout(mut self, timeout: Duration) -> Self {
        self.config.handoff_timeout = timeout;
        self
    }

    /// Set the worker stack size.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.config.thread_stack_size = Some(size);
        self
    }

    /// Validate and produce the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::InvalidArgument`] for a negative capacity or
    /// inconsistent pool sizes.
    pub fn build(mut self) -> ExecutorResult<ExecutorConfig> {
        if let Some(raw) = self.raw_capacity {
            self.config.queue_capacity = QueueCapacity::from_raw(raw)?;
        }
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ExecutorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
