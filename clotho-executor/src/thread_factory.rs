//! Worker thread creation for managed pools.
//!
//! The factory names each worker after its executor, records the hung-task
//! threshold that applies to it, and installs the worker's [`InterruptHandle`]
//! before any task runs on the thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clotho_core::{ExecutorError, ExecutorResult, InterruptHandle};
use parking_lot::Mutex;
use tracing::debug;

struct ThreadInner {
    id: usize,
    name: String,
    born: Instant,
    hung_threshold: Option<Duration>,
    interrupt: InterruptHandle,
}

/// Descriptor of a live managed worker thread.
#[derive(Clone)]
pub struct ManagedThread {
    inner: Arc<ThreadInner>,
}

impl ManagedThread {
    /// Factory-local worker number.
    #[must_use]
    pub fn id(&self) -> usize {
        self.inner.id
    }

    /// Thread name, `<executor>-worker-<n>`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Time since the thread was created.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.inner.born.elapsed()
    }

    /// Running time after which a task on this thread counts as hung.
    #[must_use]
    pub fn hung_threshold(&self) -> Option<Duration> {
        self.inner.hung_threshold
    }

    /// Whether the thread has outlived `lifetime`.
    #[must_use]
    pub fn is_expired(&self, lifetime: Option<Duration>) -> bool {
        lifetime.is_some_and(|cap| self.age() >= cap)
    }

    /// The thread's interrupt handle.
    #[must_use]
    pub fn interrupt_handle(&self) -> &InterruptHandle {
        &self.inner.interrupt
    }

    /// Raise the thread's interrupt flag.
    pub fn interrupt(&self) {
        self.inner.interrupt.interrupt();
    }
}

impl std::fmt::Debug for ManagedThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedThread")
            .field("name", &self.inner.name)
            .field("age", &self.age())
            .field("hung_threshold", &self.inner.hung_threshold)
            .finish()
    }
}

/// Creates and tracks the worker threads of one executor.
pub struct ManagedThreadFactory {
    name: String,
    hung_threshold: Option<Duration>,
    stack_size: Option<usize>,
    next_id: AtomicUsize,
    live: Arc<Mutex<HashMap<usize, ManagedThread>>>,
}

/// Removes the thread from the factory's live set when the thread body ends.
struct LiveGuard {
    id: usize,
    live: Arc<Mutex<HashMap<usize, ManagedThread>>>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.live.lock().remove(&self.id);
    }
}

impl ManagedThreadFactory {
    /// Create a factory for the executor named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, hung_threshold: Option<Duration>, stack_size: Option<usize>) -> Self {
        Self {
            name: name.into(),
            hung_threshold,
            stack_size,
            next_id: AtomicUsize::new(1),
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a worker running `body`.
    ///
    /// The thread is registered before this returns and unregistered when
    /// `body` returns or unwinds.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::ThreadSpawn`] when the OS refuses the thread.
    pub fn spawn<F>(&self, body: F) -> ExecutorResult<ManagedThread>
    where
        F: FnOnce(ManagedThread) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let thread = ManagedThread {
            inner: Arc::new(ThreadInner {
                id,
                name: format!("{}-worker-{}", self.name, id),
                born: Instant::now(),
                hung_threshold: self.hung_threshold,
                interrupt: InterruptHandle::new(),
            }),
        };

        let mut builder = thread::Builder::new().name(thread.name().to_string());
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        self.live.lock().insert(id, thread.clone());
        let guard = LiveGuard {
            id,
            live: self.live.clone(),
        };
        let worker = thread.clone();
        let spawned = builder.spawn(move || {
            let _guard = guard;
            worker.interrupt_handle().install();
            debug!(thread = worker.name(), "worker started");
            body(worker);
        });

        match spawned {
            Ok(_) => Ok(thread),
            Err(err) => {
                // the closure, and with it the guard, was dropped by the failed spawn
                Err(ExecutorError::ThreadSpawn(format!("{}: {err}", thread.name())))
            }
        }
    }

    /// Interrupt every live thread.
    pub fn interrupt_all(&self) {
        for thread in self.live.lock().values() {
            thread.interrupt();
        }
    }

    /// Snapshot of live threads.
    #[must_use]
    pub fn live_threads(&self) -> Vec<ManagedThread> {
        self.live.lock().values().cloned().collect()
    }

    /// Name of the owning executor.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ManagedThreadFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedThreadFactory")
            .field("name", &self.name)
            .field("hung_threshold", &self.hung_threshold)
            .field("live", &self.live.lock().len())
            .finish()
    }
}
