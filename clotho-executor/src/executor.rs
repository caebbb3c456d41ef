//! The managed executor and its restricted adapter view.
//!
//! [`ManagedExecutor`] owns the lifecycle. [`ManagedExecutorAdapter`] shares
//! the same state and submission surface but refuses lifecycle operations; it
//! is what tasks hold as their back-reference and what listeners receive.

use std::sync::Arc;
use std::time::Duration;

use clotho_core::{BoxError, ContextService, ExecutorConfig, ExecutorConfigBuilder, ExecutorError, ExecutorResult, TaskError, TaskId, TaskResult};
use tracing::info;

use crate::completion::CompletionService;
use crate::listener::TaskListener;
use crate::pool::ManagedThreadPool;
use crate::task::{CompletionCallback, ManagedTask, Runnable, TaskView, Work};

struct ExecutorShared {
    name: String,
    context_service: Option<ContextService>,
    pool: ManagedThreadPool,
}

/// Restricted handle to a managed executor.
///
/// Submits work and reads metrics exactly like [`ManagedExecutor`]; every
/// lifecycle method fails with [`ExecutorError::NotPermitted`].
#[derive(Clone)]
pub struct ManagedExecutorAdapter {
    shared: Arc<ExecutorShared>,
}

impl ManagedExecutorAdapter {
    pub(crate) fn submit_task<T: Send + 'static>(
        &self,
        work: Work<T>,
        listener: Option<Arc<dyn TaskListener>>,
        callback: Option<CompletionCallback<T>>,
    ) -> ExecutorResult<ManagedTask<T>> {
        let shared = &self.shared;
        if shared.pool.is_shutdown() {
            return Err(ExecutorError::InvalidState(format!("executor {} is shut down", shared.name)));
        }

        let context = shared.context_service.as_ref().map(ContextService::capture);
        let task = ManagedTask::new(self.clone(), work, listener, context);
        if let Some(callback) = callback {
            task.set_completion_callback(callback)?;
        }
        task.submitted()?;

        let job: Arc<dyn Runnable> = Arc::new(task.clone());
        if let Err(err) = shared.pool.execute(job) {
            task.reject(TaskError::from(err.clone()));
            return Err(err);
        }
        Ok(task)
    }

    /// Run `work` without returning a future.
    ///
    /// # Errors
    ///
    /// [`ExecutorError::InvalidState`] after shutdown, or
    /// [`ExecutorError::Rejected`] when the pool refuses the task.
    pub fn execute<F>(&self, work: F) -> ExecutorResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_task::<()>(
            Box::new(move || {
                work();
                Ok(())
            }),
            None,
            None,
        )
        .map(|_| ())
    }

    /// Submit a value-producing task.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub fn submit<F, T>(&self, callable: F) -> ExecutorResult<ManagedTask<T>>
    where
        F: FnOnce() -> Result<T, BoxError> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_task(Box::new(callable), None, None)
    }

    /// Submit a value-producing task observed by `listener`.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub fn submit_with_listener<F, T>(&self, callable: F, listener: Arc<dyn TaskListener>) -> ExecutorResult<ManagedTask<T>>
    where
        F: FnOnce() -> Result<T, BoxError> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_task(Box::new(callable), Some(listener), None)
    }

    /// Submit a side-effecting task whose future yields `result`.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub fn submit_runnable<F, T>(&self, runnable: F, result: T) -> ExecutorResult<ManagedTask<T>>
    where
        F: FnOnce() + Send + 'static,
        T: Send + 'static,
    {
        self.submit_task(runnable_work(runnable, result), None, None)
    }

    /// Submit a side-effecting task observed by `listener`.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub fn submit_runnable_with_listener<F, T>(
        &self,
        runnable: F,
        result: T,
        listener: Arc<dyn TaskListener>,
    ) -> ExecutorResult<ManagedTask<T>>
    where
        F: FnOnce() + Send + 'static,
        T: Send + 'static,
    {
        self.submit_task(runnable_work(runnable, result), Some(listener), None)
    }

    /// Submit every callable and wait until all are done.
    ///
    /// The futures come back in submission order. If a submission fails, the
    /// tasks already submitted are cancelled and the error is returned.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub fn invoke_all<F, T>(&self, callables: Vec<F>) -> ExecutorResult<Vec<ManagedTask<T>>>
    where
        F: FnOnce() -> Result<T, BoxError> + Send + 'static,
        T: Send + 'static,
    {
        let mut tasks = Vec::with_capacity(callables.len());
        for callable in callables {
            match self.submit(callable) {
                Ok(task) => tasks.push(task),
                Err(err) => {
                    for task in &tasks {
                        task.cancel(true);
                    }
                    return Err(err);
                }
            }
        }
        for task in &tasks {
            task.wait();
        }
        Ok(tasks)
    }

    /// Return the result of the first callable to succeed; the rest are cancelled.
    ///
    /// # Errors
    ///
    /// The last failure when no callable succeeds, or the submission error
    /// converted to a [`TaskError`]. An empty list is an
    /// [`TaskError::Aborted`] carrying [`ExecutorError::InvalidArgument`].
    pub fn invoke_any<F, T>(&self, callables: Vec<F>) -> TaskResult<T>
    where
        F: FnOnce() -> Result<T, BoxError> + Send + 'static,
        T: Clone + Send + 'static,
    {
        if callables.is_empty() {
            return Err(TaskError::aborted(ExecutorError::InvalidArgument(
                "invoke_any needs at least one task".into(),
            )));
        }

        let service = CompletionService::new(self.clone());
        let mut tasks = Vec::with_capacity(callables.len());
        let mut last_failure = None;
        for callable in callables {
            match service.submit(callable) {
                Ok(task) => tasks.push(task),
                Err(err) => {
                    last_failure = Some(TaskError::from(err));
                    break;
                }
            }
        }

        let mut outcome = None;
        for _ in 0..tasks.len() {
            let finished = match service.take() {
                Ok(finished) => finished,
                Err(err) => {
                    last_failure = Some(err);
                    break;
                }
            };
            match finished.get() {
                Ok(value) => {
                    outcome = Some(value);
                    break;
                }
                Err(err) => last_failure = Some(err),
            }
        }

        for task in &tasks {
            task.cancel(true);
        }
        match outcome {
            Some(value) => Ok(value),
            None => Err(last_failure.unwrap_or(TaskError::Cancelled)),
        }
    }

    /// A completion service over this executor.
    #[must_use]
    pub fn completion_service<T: Send + 'static>(&self) -> CompletionService<T> {
        CompletionService::new(self.clone())
    }

    /// Executor name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Tasks accepted so far.
    #[must_use]
    pub fn task_count(&self) -> u64 {
        self.shared.pool.task_count()
    }

    /// Tasks a worker finished running.
    #[must_use]
    pub fn completed_task_count(&self) -> u64 {
        self.shared.pool.completed_task_count()
    }

    /// Tasks currently running past their hung threshold.
    #[must_use]
    pub fn hung_task_ids(&self) -> Vec<TaskId> {
        self.shared.pool.hung_tasks()
    }

    /// The underlying pool, for its observability accessors.
    #[must_use]
    pub fn pool(&self) -> &ManagedThreadPool {
        &self.shared.pool
    }

    /// Refused: lifecycle belongs to the owning [`ManagedExecutor`].
    ///
    /// # Errors
    ///
    /// Always [`ExecutorError::NotPermitted`].
    pub fn shutdown(&self) -> ExecutorResult<()> {
        Err(ExecutorError::NotPermitted("shutdown"))
    }

    /// Refused: lifecycle belongs to the owning [`ManagedExecutor`].
    ///
    /// # Errors
    ///
    /// Always [`ExecutorError::NotPermitted`].
    pub fn shutdown_now(&self) -> ExecutorResult<Vec<Arc<dyn TaskView>>> {
        Err(ExecutorError::NotPermitted("shutdown_now"))
    }

    /// Refused: lifecycle belongs to the owning [`ManagedExecutor`].
    ///
    /// # Errors
    ///
    /// Always [`ExecutorError::NotPermitted`].
    pub fn is_shutdown(&self) -> ExecutorResult<bool> {
        Err(ExecutorError::NotPermitted("is_shutdown"))
    }

    /// Refused: lifecycle belongs to the owning [`ManagedExecutor`].
    ///
    /// # Errors
    ///
    /// Always [`ExecutorError::NotPermitted`].
    pub fn is_terminated(&self) -> ExecutorResult<bool> {
        Err(ExecutorError::NotPermitted("is_terminated"))
    }

    /// Refused: lifecycle belongs to the owning [`ManagedExecutor`].
    ///
    /// # Errors
    ///
    /// Always [`ExecutorError::NotPermitted`].
    pub fn await_termination(&self, _timeout: Duration) -> ExecutorResult<bool> {
        Err(ExecutorError::NotPermitted("await_termination"))
    }
}

impl std::fmt::Debug for ManagedExecutorAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedExecutorAdapter")
            .field("name", &self.shared.name)
            .finish()
    }
}

fn runnable_work<F, T>(runnable: F, result: T) -> Work<T>
where
    F: FnOnce() + Send + 'static,
    T: Send + 'static,
{
    Box::new(move || {
        runnable();
        Ok(result)
    })
}

/// A managed executor: pool, task lifecycle and context propagation.
///
/// Dropping the executor starts a graceful shutdown; queued work still runs.
///
/// # Examples
///
/// ```
/// use clotho_executor::ManagedExecutor;
///
/// let executor = ManagedExecutor::builder()
///     .name("docs")
///     .core_pool_size(2)
///     .max_pool_size(2)
///     .build()
///     .unwrap();
///
/// let task = executor.submit(|| Ok(6 * 7)).unwrap();
/// assert_eq!(task.get().unwrap(), 42);
/// ```
pub struct ManagedExecutor {
    adapter: ManagedExecutorAdapter,
}

impl ManagedExecutor {
    /// Create an executor from `config`.
    ///
    /// # Errors
    ///
    /// [`ExecutorError::InvalidArgument`] when the configuration is invalid.
    pub fn new(config: ExecutorConfig) -> ExecutorResult<Self> {
        let pool = ManagedThreadPool::new(&config)?;
        info!(
            executor = %config.name,
            core = config.core_pool_size,
            max = config.max_pool_size,
            queue = ?config.queue_kind(),
            "managed executor started"
        );
        Ok(Self {
            adapter: ManagedExecutorAdapter {
                shared: Arc::new(ExecutorShared {
                    name: config.name,
                    context_service: config.context_service,
                    pool,
                }),
            },
        })
    }

    /// Start building an executor.
    #[must_use]
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    /// The restricted view handed to tasks and listeners.
    #[must_use]
    pub fn adapter(&self) -> ManagedExecutorAdapter {
        self.adapter.clone()
    }

    /// See [`ManagedExecutorAdapter::execute`].
    ///
    /// # Errors
    ///
    /// [`ExecutorError::InvalidState`] after shutdown, or
    /// [`ExecutorError::Rejected`] when the pool refuses the task.
    pub fn execute<F>(&self, work: F) -> ExecutorResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.adapter.execute(work)
    }

    /// See [`ManagedExecutorAdapter::submit`].
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub fn submit<F, T>(&self, callable: F) -> ExecutorResult<ManagedTask<T>>
    where
        F: FnOnce() -> Result<T, BoxError> + Send + 'static,
        T: Send + 'static,
    {
        self.adapter.submit(callable)
    }

    /// See [`ManagedExecutorAdapter::submit_with_listener`].
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub fn submit_with_listener<F, T>(&self, callable: F, listener: Arc<dyn TaskListener>) -> ExecutorResult<ManagedTask<T>>
    where
        F: FnOnce() -> Result<T, BoxError> + Send + 'static,
        T: Send + 'static,
    {
        self.adapter.submit_with_listener(callable, listener)
    }

    /// See [`ManagedExecutorAdapter::submit_runnable`].
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub fn submit_runnable<F, T>(&self, runnable: F, result: T) -> ExecutorResult<ManagedTask<T>>
    where
        F: FnOnce() + Send + 'static,
        T: Send + 'static,
    {
        self.adapter.submit_runnable(runnable, result)
    }

    /// See [`ManagedExecutorAdapter::submit_runnable_with_listener`].
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub fn submit_runnable_with_listener<F, T>(
        &self,
        runnable: F,
        result: T,
        listener: Arc<dyn TaskListener>,
    ) -> ExecutorResult<ManagedTask<T>>
    where
        F: FnOnce() + Send + 'static,
        T: Send + 'static,
    {
        self.adapter.submit_runnable_with_listener(runnable, result, listener)
    }

    /// See [`ManagedExecutorAdapter::invoke_all`].
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub fn invoke_all<F, T>(&self, callables: Vec<F>) -> ExecutorResult<Vec<ManagedTask<T>>>
    where
        F: FnOnce() -> Result<T, BoxError> + Send + 'static,
        T: Send + 'static,
    {
        self.adapter.invoke_all(callables)
    }

    /// See [`ManagedExecutorAdapter::invoke_any`].
    ///
    /// # Errors
    ///
    /// The last failure when no callable succeeds.
    pub fn invoke_any<F, T>(&self, callables: Vec<F>) -> TaskResult<T>
    where
        F: FnOnce() -> Result<T, BoxError> + Send + 'static,
        T: Clone + Send + 'static,
    {
        self.adapter.invoke_any(callables)
    }

    /// A completion service over this executor.
    #[must_use]
    pub fn completion_service<T: Send + 'static>(&self) -> CompletionService<T> {
        self.adapter.completion_service()
    }

    /// Executor name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    /// Tasks accepted so far.
    #[must_use]
    pub fn task_count(&self) -> u64 {
        self.adapter.task_count()
    }

    /// Tasks a worker finished running.
    #[must_use]
    pub fn completed_task_count(&self) -> u64 {
        self.adapter.completed_task_count()
    }

    /// Tasks currently running past their hung threshold.
    #[must_use]
    pub fn hung_task_ids(&self) -> Vec<TaskId> {
        self.adapter.hung_task_ids()
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &ManagedThreadPool {
        self.adapter.pool()
    }

    /// Stop accepting work; queued and running tasks complete. Idempotent.
    pub fn shutdown(&self) {
        self.adapter.shared.pool.shutdown();
    }

    /// Stop accepting work, cancel queued tasks and interrupt running ones.
    ///
    /// Returns the tasks that were still queued.
    pub fn shutdown_now(&self) -> Vec<Arc<dyn TaskView>> {
        self.adapter.shared.pool.shutdown_now()
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.adapter.shared.pool.is_shutdown()
    }

    /// Whether shutdown completed and every worker exited.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.adapter.shared.pool.is_terminated()
    }

    /// Block until terminated or `timeout` elapses; `true` if terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.adapter.shared.pool.await_termination(timeout)
    }
}

impl Drop for ManagedExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ManagedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedExecutor")
            .field("name", &self.name())
            .field("pool", self.pool())
            .finish()
    }
}

/// Builder for [`ManagedExecutor`].
#[derive(Debug, Default)]
pub struct ExecutorBuilder {
    config: ExecutorConfigBuilder,
}

impl ExecutorBuilder {
    /// Start from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor name; worker threads are named after it.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config = self.config.name(name);
        self
    }

    /// Threads kept alive even when idle.
    #[must_use]
    pub fn core_pool_size(mut self, size: usize) -> Self {
        self.config = self.config.core_pool_size(size);
        self
    }

    /// Upper bound on live worker threads.
    #[must_use]
    pub fn max_pool_size(mut self, size: usize) -> Self {
        self.config = self.config.max_pool_size(size);
        self
    }

    /// Idle time after which threads above the core size exit.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.config = self.config.keep_alive(keep_alive);
        self
    }

    /// Age after which a worker retires.
    #[must_use]
    pub fn thread_lifetime(mut self, lifetime: Duration) -> Self {
        self.config = self.config.thread_lifetime(lifetime);
        self
    }

    /// Queue capacity: 0 for direct hand-off, `i32::MAX` for unbounded.
    #[must_use]
    pub fn queue_capacity(mut self, raw: i64) -> Self {
        self.config = self.config.queue_capacity(raw);
        self
    }

    /// Use an unbounded queue.
    #[must_use]
    pub fn unbounded_queue(mut self) -> Self {
        self.config = self.config.unbounded_queue();
        self
    }

    /// Hung-task threshold; zero disables detection.
    #[must_use]
    pub fn hung_task_threshold(mut self, threshold: Duration) -> Self {
        self.config = self.config.hung_task_threshold(threshold);
        self
    }

    /// Suppress hang detection for long-running work.
    #[must_use]
    pub fn long_running_tasks(mut self, long_running: bool) -> Self {
        self.config = self.config.long_running_tasks(long_running);
        self
    }

    /// Policy applied when admission fails.
    #[must_use]
    pub fn reject_policy(mut self, policy: clotho_core::RejectPolicy) -> Self {
        self.config = self.config.reject_policy(policy);
        self
    }

    /// Context propagated from submitter to worker.
    #[must_use]
    pub fn context_service(mut self, service: ContextService) -> Self {
        self.config = self.config.context_service(service);
        self
    }

    /// Longest a submitter waits for a worker on a direct hand-off queue.
    #[must_use]
    pub fn handoff_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.handoff_timeout(timeout);
        self
    }

    /// Worker thread stack size.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.config = self.config.thread_stack_size(size);
        self
    }

    /// Validate the configuration and start the executor.
    ///
    /// # Errors
    ///
    /// [`ExecutorError::InvalidArgument`] when the configuration is invalid.
    pub fn build(self) -> ExecutorResult<ManagedExecutor> {
        ManagedExecutor::new(self.config.build()?)
    }
}
