//! Completion-ordered retrieval of finished tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clotho_core::{interrupt, BoxError, ExecutorError, ExecutorResult, TaskError, TaskResult};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::warn;

use crate::executor::ManagedExecutorAdapter;
use crate::listener::TaskListener;
use crate::task::{CompletionCallback, ManagedTask};

const INTERRUPT_POLL: Duration = Duration::from_millis(20);

/// Queue a [`CompletionService`] delivers finished tasks into.
pub struct CompletionQueue<T> {
    sender: Sender<ManagedTask<T>>,
    receiver: Receiver<ManagedTask<T>>,
    capacity: Option<usize>,
}

impl<T> CompletionQueue<T> {
    /// A queue without a capacity limit.
    #[must_use]
    pub fn unbounded() -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            sender,
            receiver,
            capacity: None,
        }
    }

    /// A queue holding at most `capacity` finished tasks. Tasks finishing while
    /// it is full are dropped from the service.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = channel::bounded(capacity);
        Self {
            sender,
            receiver,
            capacity: Some(capacity),
        }
    }

    /// Capacity limit, if any.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl<T> Default for CompletionQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Submits tasks through an executor and hands them back in the order they
/// finished.
///
/// The service does not own the executor's lifecycle.
pub struct CompletionService<T> {
    executor: ManagedExecutorAdapter,
    sender: Sender<ManagedTask<T>>,
    receiver: Receiver<ManagedTask<T>>,
    dropped: Arc<AtomicU64>,
}

impl<T: Send + 'static> CompletionService<T> {
    /// A service over `executor` with an unbounded queue.
    #[must_use]
    pub fn new(executor: ManagedExecutorAdapter) -> Self {
        let queue = CompletionQueue::unbounded();
        Self {
            executor,
            sender: queue.sender,
            receiver: queue.receiver,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A service over `executor` delivering into `queue`.
    ///
    /// # Errors
    ///
    /// [`ExecutorError::InvalidArgument`] for a zero-capacity queue, which
    /// could never hold a finished task.
    pub fn with_queue(executor: ManagedExecutorAdapter, queue: CompletionQueue<T>) -> ExecutorResult<Self> {
        if queue.capacity == Some(0) {
            return Err(ExecutorError::InvalidArgument("completion queue capacity must be greater than zero".into()));
        }
        Ok(Self {
            executor,
            sender: queue.sender,
            receiver: queue.receiver,
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    fn enqueue_on_completion(&self) -> CompletionCallback<T> {
        let sender = self.sender.clone();
        let dropped = self.dropped.clone();
        Box::new(move |task: ManagedTask<T>| {
            let id = task.id();
            if sender.try_send(task).is_err() {
                dropped.fetch_add(1, Ordering::Relaxed);
                warn!(task = %id, "completion queue is full; finished task dropped");
            }
        })
    }

    /// Submit a value-producing task.
    ///
    /// # Errors
    ///
    /// As [`ManagedExecutorAdapter::submit`].
    pub fn submit<F>(&self, callable: F) -> ExecutorResult<ManagedTask<T>>
    where
        F: FnOnce() -> Result<T, BoxError> + Send + 'static,
    {
        self.executor
            .submit_task(Box::new(callable), None, Some(self.enqueue_on_completion()))
    }

    /// Submit a value-producing task observed by `listener`.
    ///
    /// # Errors
    ///
    /// As [`ManagedExecutorAdapter::submit`].
    pub fn submit_with_listener<F>(&self, callable: F, listener: Arc<dyn TaskListener>) -> ExecutorResult<ManagedTask<T>>
    where
        F: FnOnce() -> Result<T, BoxError> + Send + 'static,
    {
        self.executor
            .submit_task(Box::new(callable), Some(listener), Some(self.enqueue_on_completion()))
    }

    /// Submit a side-effecting task whose future yields `result`.
    ///
    /// # Errors
    ///
    /// As [`ManagedExecutorAdapter::submit`].
    pub fn submit_runnable<F>(
        &self,
        runnable: F,
        result: T,
        listener: Option<Arc<dyn TaskListener>>,
    ) -> ExecutorResult<ManagedTask<T>>
    where
        F: FnOnce() + Send + 'static,
    {
        let work = Box::new(move || {
            runnable();
            Ok(result)
        });
        self.executor
            .submit_task(work, listener, Some(self.enqueue_on_completion()))
    }

    /// Wait for the next finished task.
    ///
    /// # Errors
    ///
    /// [`TaskError::Interrupted`] when called on a managed worker that is
    /// interrupted while waiting.
    pub fn take(&self) -> TaskResult<ManagedTask<T>> {
        match self.wait(None)? {
            Some(task) => Ok(task),
            None => Err(TaskError::Cancelled),
        }
    }

    /// The next finished task, if one is ready.
    #[must_use]
    pub fn poll(&self) -> Option<ManagedTask<T>> {
        self.receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for the next finished task.
    ///
    /// # Errors
    ///
    /// As [`take`](Self::take).
    pub fn poll_timeout(&self, timeout: Duration) -> TaskResult<Option<ManagedTask<T>>> {
        self.wait(Some(Instant::now() + timeout))
    }

    fn wait(&self, deadline: Option<Instant>) -> TaskResult<Option<ManagedTask<T>>> {
        let Some(caller) = interrupt::current() else {
            return Ok(match deadline {
                Some(deadline) => self.receiver.recv_deadline(deadline).ok(),
                None => self.receiver.recv().ok(),
            });
        };
        loop {
            if caller.is_interrupted() {
                return Err(TaskError::Interrupted);
            }
            let slice = Instant::now() + INTERRUPT_POLL;
            let until = deadline.map_or(slice, |d| d.min(slice));
            match self.receiver.recv_deadline(until) {
                Ok(task) => return Ok(Some(task)),
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
                Err(RecvTimeoutError::Timeout) => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Finished tasks waiting to be taken.
    #[must_use]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether no finished task is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Finished tasks lost because the queue was full.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// The executor tasks are submitted through.
    #[must_use]
    pub fn executor(&self) -> &ManagedExecutorAdapter {
        &self.executor
    }
}

impl<T> std::fmt::Debug for CompletionService<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionService")
            .field("executor", &self.executor)
            .field("ready", &self.receiver.len())
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}
