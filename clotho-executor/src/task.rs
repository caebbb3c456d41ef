//! Managed tasks: lifecycle, result hand-off and cancellation.
//!
//! A [`ManagedTask`] is both the unit the pool runs and the future the
//! submitter waits on. Its state lives in one mutex-guarded slot; waiters block
//! on a condition variable that is signalled only after the completion callback
//! has returned, so anything observing `is_done()` also observes the callback's
//! effects.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clotho_core::context::CapturedContext;
use clotho_core::{interrupt, BoxError, ExecutorError, ExecutorResult, InterruptHandle, PanicError, TaskError, TaskId, TaskResult, TaskState};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::executor::ManagedExecutorAdapter;
use crate::listener::TaskListener;

/// Granularity at which blocked `get` calls on a managed worker re-check the
/// worker's interrupt flag.
const INTERRUPT_POLL: Duration = Duration::from_millis(20);

/// User work: a value-producing closure.
pub(crate) type Work<T> = Box<dyn FnOnce() -> Result<T, BoxError> + Send>;

/// One-shot hook run when the task reaches a terminal state.
pub(crate) type CompletionCallback<T> = Box<dyn FnOnce(ManagedTask<T>) + Send>;

/// Submit, start and end instants of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskTimings {
    /// When the executor accepted the task
    pub submitted_at: Option<Instant>,
    /// When a worker picked it up
    pub started_at: Option<Instant>,
    /// When it reached a terminal state
    pub ended_at: Option<Instant>,
}

/// Type-erased view of a managed task, handed to listeners and returned by
/// `shutdown_now`.
pub trait TaskView: Send + Sync {
    /// The task's identifier.
    fn id(&self) -> TaskId;

    /// Current lifecycle state.
    fn state(&self) -> TaskState;

    /// Whether the task is terminal and its completion callback has returned.
    fn is_done(&self) -> bool;

    /// Whether the task was cancelled, or a cancel is pending on it.
    fn is_cancelled(&self) -> bool;

    /// Whether hang detection flagged the task.
    fn is_hung(&self) -> bool;

    /// Request cancellation. See [`ManagedTask::cancel`].
    fn cancel(&self, interrupt_if_running: bool) -> bool;

    /// Lifecycle timestamps.
    fn timings(&self) -> TaskTimings;
}

/// Pool-side operations on a task.
pub(crate) trait Runnable: TaskView {
    /// Execute on the calling worker.
    fn run(&self);

    /// Mark hung; `true` only on the first call.
    fn mark_hung(&self) -> bool;

    fn into_view(self: Arc<Self>) -> Arc<dyn TaskView>;
}

struct Slot<T> {
    state: TaskState,
    outcome: Option<TaskResult<T>>,
    cancel_requested: bool,
    runner: Option<InterruptHandle>,
    timings: TaskTimings,
    /// Set once the completion callback has returned
    released: bool,
}

impl<T> Slot<T> {
    /// Move to `next` only if it lies further along the lifecycle.
    fn advance(&mut self, next: TaskState) -> bool {
        if next.rank() <= self.state.rank() {
            return false;
        }
        self.state = next;
        true
    }
}

struct TaskInner<T> {
    id: TaskId,
    executor: ManagedExecutorAdapter,
    listener: Option<Arc<dyn TaskListener>>,
    context: Option<CapturedContext>,
    work: Mutex<Option<Work<T>>>,
    callback: Mutex<Option<CompletionCallback<T>>>,
    slot: Mutex<Slot<T>>,
    released: Condvar,
    hung: AtomicBool,
}

/// A submitted unit of work and the future of its result.
///
/// Cloning yields another handle to the same task.
pub struct ManagedTask<T> {
    inner: Arc<TaskInner<T>>,
}

impl<T> Clone for ManagedTask<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> ManagedTask<T> {
    pub(crate) fn new(
        executor: ManagedExecutorAdapter,
        work: Work<T>,
        listener: Option<Arc<dyn TaskListener>>,
        context: Option<CapturedContext>,
    ) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: TaskId::next(),
                executor,
                listener,
                context,
                work: Mutex::new(Some(work)),
                callback: Mutex::new(None),
                slot: Mutex::new(Slot {
                    state: TaskState::Created,
                    outcome: None,
                    cancel_requested: false,
                    runner: None,
                    timings: TaskTimings::default(),
                    released: false,
                }),
                released: Condvar::new(),
                hung: AtomicBool::new(false),
            }),
        }
    }

    /// Install the completion callback. Only one may ever be installed.
    pub(crate) fn set_completion_callback(&self, callback: CompletionCallback<T>) -> ExecutorResult<()> {
        let mut slot = self.inner.callback.lock();
        if slot.is_some() || self.inner.slot.lock().state != TaskState::Created {
            return Err(ExecutorError::InvalidState(format!(
                "{} already has a completion callback or was submitted",
                self.inner.id
            )));
        }
        *slot = Some(callback);
        Ok(())
    }

    /// Mark the task accepted and notify the listener.
    pub(crate) fn submitted(&self) -> ExecutorResult<()> {
        {
            let mut slot = self.inner.slot.lock();
            if slot.state != TaskState::Created {
                return Err(ExecutorError::InvalidState(format!(
                    "{} was already submitted ({})",
                    self.inner.id, slot.state
                )));
            }
            slot.state = TaskState::Submitted;
            slot.timings.submitted_at = Some(Instant::now());
        }
        self.notify("task_submitted", |listener, task, executor| {
            listener.task_submitted(task, executor);
        });
        Ok(())
    }

    /// Abort a task the pool refused. The completion callback is discarded.
    pub(crate) fn reject(&self, failure: TaskError) {
        {
            let mut slot = self.inner.slot.lock();
            if !slot.advance(TaskState::Aborted) {
                return;
            }
            slot.outcome = Some(Err(failure.clone()));
            slot.timings.ended_at = Some(Instant::now());
        }
        drop(self.inner.callback.lock().take());
        drop(self.inner.work.lock().take());
        self.notify("task_aborted", |listener, task, executor| {
            listener.task_aborted(task, executor, &failure);
        });
        self.release();
    }

    fn execute(&self) {
        let inner = &*self.inner;
        {
            let mut slot = inner.slot.lock();
            if slot.state != TaskState::Submitted {
                debug!(task = %inner.id, state = %slot.state, "skipping task that is no longer queued");
                return;
            }
            slot.advance(TaskState::Starting);
            slot.timings.started_at = Some(Instant::now());
            slot.runner = interrupt::current();
        }
        self.notify("task_starting", |listener, task, executor| {
            listener.task_starting(task, executor);
        });

        let applied = match inner.context.as_ref().map(CapturedContext::apply).transpose() {
            Ok(applied) => applied,
            Err(cause) => {
                warn!(task = %inner.id, error = %cause, "context could not be applied; aborting task");
                let failure = TaskError::aborted(cause);
                self.finish(TaskState::Aborted, Err(failure.clone()));
                self.notify("task_aborted", |listener, task, executor| {
                    listener.task_aborted(task, executor, &failure);
                });
                self.complete();
                return;
            }
        };

        inner.slot.lock().advance(TaskState::Running);
        let work = inner.work.lock().take();
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || {
            let _restore = applied;
            match work {
                Some(work) => work(),
                None => Err("task work was already consumed".into()),
            }
        }));
        let outcome = match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(TaskError::failed(err)),
            Err(payload) => Err(TaskError::failed(panic_error(&*payload))),
        };

        let cancelled = inner.slot.lock().cancel_requested;
        let failure = if cancelled {
            self.finish(TaskState::Cancelled, Err(TaskError::Cancelled));
            Some(TaskError::Cancelled)
        } else {
            match outcome {
                Ok(value) => {
                    self.finish(TaskState::Succeeded, Ok(value));
                    None
                }
                Err(err) => {
                    self.finish(TaskState::Failed, Err(err.clone()));
                    Some(err)
                }
            }
        };
        self.notify("task_done", |listener, task, executor| {
            listener.task_done(task, executor, failure.as_ref());
        });
        self.complete();
    }

    fn finish(&self, state: TaskState, outcome: TaskResult<T>) {
        let mut slot = self.inner.slot.lock();
        if !slot.advance(state) {
            debug!(task = %self.inner.id, from = %slot.state, to = %state, "ignoring backward transition");
            return;
        }
        slot.outcome = Some(outcome);
        slot.runner = None;
        slot.timings.ended_at = Some(Instant::now());
    }

    /// Run the completion callback, then release waiters.
    fn complete(&self) {
        let callback = self.inner.callback.lock().take();
        if let Some(callback) = callback {
            let handle = self.clone();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || callback(handle))) {
                warn!(task = %self.inner.id, panic = %panic_error(&*payload), "completion callback panicked");
            }
        }
        self.release();
    }

    fn release(&self) {
        let mut slot = self.inner.slot.lock();
        slot.released = true;
        self.inner.released.notify_all();
    }

    fn notify(&self, event: &'static str, call: impl FnOnce(&dyn TaskListener, &dyn TaskView, &ManagedExecutorAdapter)) {
        let Some(listener) = self.inner.listener.as_deref() else {
            return;
        };
        let executor = &self.inner.executor;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| call(listener, self, executor)));
        if let Err(payload) = outcome {
            warn!(task = %self.inner.id, event, panic = %panic_error(&*payload), "task listener panicked");
        }
    }

    /// Request cancellation.
    ///
    /// A queued task is cancelled immediately and leaves the pool's queue: its
    /// listener sees `task_done` with [`TaskError::Cancelled`], the completion
    /// callback runs and waiters are released. A started task records the intent and, when
    /// `interrupt_if_running` is set, interrupts its worker; the task reports
    /// cancelled once the worker finishes it. Returns `false` for a task that
    /// already finished.
    pub fn cancel(&self, interrupt_if_running: bool) -> bool {
        let mut slot = self.inner.slot.lock();
        match slot.state {
            TaskState::Created | TaskState::Submitted => {
                let queued = slot.state == TaskState::Submitted;
                slot.advance(TaskState::CancelledBeforeStart);
                slot.outcome = Some(Err(TaskError::Cancelled));
                slot.timings.ended_at = Some(Instant::now());
                drop(slot);
                drop(self.inner.work.lock().take());
                if queued {
                    // give the queue slot back; a worker that already dequeued it skips it
                    self.inner.executor.pool().remove(self.inner.id);
                }
                debug!(task = %self.inner.id, "cancelled before start");
                self.notify("task_done", |listener, task, executor| {
                    listener.task_done(task, executor, Some(&TaskError::Cancelled));
                });
                self.complete();
                true
            }
            TaskState::Starting | TaskState::Running => {
                slot.cancel_requested = true;
                if interrupt_if_running {
                    if let Some(runner) = &slot.runner {
                        runner.interrupt();
                    }
                }
                true
            }
            _ => false,
        }
    }

    /// The task's identifier.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.inner.slot.lock().state
    }

    /// Whether the task is terminal and its completion callback has returned.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.slot.lock().released
    }

    /// Whether the task was cancelled or has a pending cancel request.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        let slot = self.inner.slot.lock();
        slot.state.is_cancelled() || slot.cancel_requested
    }

    /// Whether hang detection flagged this task.
    #[must_use]
    pub fn is_hung(&self) -> bool {
        self.inner.hung.load(Ordering::Acquire)
    }

    /// Lifecycle timestamps.
    #[must_use]
    pub fn timings(&self) -> TaskTimings {
        self.inner.slot.lock().timings
    }

    /// Block until the task is done.
    pub fn wait(&self) {
        let mut slot = self.inner.slot.lock();
        while !slot.released {
            self.inner.released.wait(&mut slot);
        }
    }

    /// Block until the task is done or `timeout` elapses; `true` if done.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.slot.lock();
        while !slot.released {
            if self.inner.released.wait_until(&mut slot, deadline).timed_out() {
                return slot.released;
            }
        }
        true
    }
}

impl<T: Clone + Send + 'static> ManagedTask<T> {
    /// Wait for the result.
    ///
    /// # Errors
    ///
    /// The task's failure: [`TaskError::Cancelled`], [`TaskError::TaskFailed`],
    /// [`TaskError::Aborted`] or [`TaskError::Rejected`]. When called on a
    /// managed worker that gets interrupted, [`TaskError::Interrupted`].
    pub fn get(&self) -> TaskResult<T> {
        self.wait_for_result(None)
    }

    /// Wait at most `timeout` for the result.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get), plus [`TaskError::Timeout`] when the task is not
    /// done in time.
    pub fn get_timeout(&self, timeout: Duration) -> TaskResult<T> {
        self.wait_for_result(Some(Instant::now() + timeout))
    }

    fn wait_for_result(&self, deadline: Option<Instant>) -> TaskResult<T> {
        let caller = interrupt::current();
        let mut slot = self.inner.slot.lock();
        while !slot.released {
            if caller.as_ref().is_some_and(InterruptHandle::is_interrupted) {
                return Err(TaskError::Interrupted);
            }
            let until = match (deadline, &caller) {
                (Some(deadline), Some(_)) => deadline.min(Instant::now() + INTERRUPT_POLL),
                (Some(deadline), None) => deadline,
                (None, Some(_)) => Instant::now() + INTERRUPT_POLL,
                (None, None) => {
                    self.inner.released.wait(&mut slot);
                    continue;
                }
            };
            self.inner.released.wait_until(&mut slot, until);
            if !slot.released && deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(TaskError::Timeout);
            }
        }
        match &slot.outcome {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(err)) => Err(err.clone()),
            None => Err(TaskError::Cancelled),
        }
    }
}

impl<T: Send + 'static> TaskView for ManagedTask<T> {
    fn id(&self) -> TaskId {
        ManagedTask::id(self)
    }

    fn state(&self) -> TaskState {
        ManagedTask::state(self)
    }

    fn is_done(&self) -> bool {
        ManagedTask::is_done(self)
    }

    fn is_cancelled(&self) -> bool {
        ManagedTask::is_cancelled(self)
    }

    fn is_hung(&self) -> bool {
        ManagedTask::is_hung(self)
    }

    fn cancel(&self, interrupt_if_running: bool) -> bool {
        ManagedTask::cancel(self, interrupt_if_running)
    }

    fn timings(&self) -> TaskTimings {
        ManagedTask::timings(self)
    }
}

impl<T: Send + 'static> Runnable for ManagedTask<T> {
    fn run(&self) {
        self.execute();
    }

    fn mark_hung(&self) -> bool {
        !self.inner.hung.swap(true, Ordering::AcqRel)
    }

    fn into_view(self: Arc<Self>) -> Arc<dyn TaskView> {
        self
    }
}

impl<T> fmt::Debug for ManagedTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.slot.lock();
        f.debug_struct("ManagedTask")
            .field("id", &self.inner.id)
            .field("state", &slot.state)
            .field("done", &slot.released)
            .finish()
    }
}

fn panic_error(payload: &(dyn Any + Send)) -> PanicError {
    PanicError::from_payload(payload)
}
