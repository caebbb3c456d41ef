//! Task lifecycle observation.

use clotho_core::TaskError;

use crate::executor::ManagedExecutorAdapter;
use crate::task::TaskView;

/// Receives lifecycle events of the tasks it is attached to.
///
/// For one task the events arrive in order: `task_submitted`, then at most one
/// `task_starting`, then exactly one of `task_done` or `task_aborted`. A task
/// cancelled while queued skips `task_starting`. Events are delivered on the
/// submitting thread (`task_submitted`) or the worker thread (the rest);
/// a panicking listener is logged and otherwise ignored.
///
/// The executor passed in is the restricted adapter: it can submit follow-up
/// work but cannot shut the executor down.
#[allow(unused_variables)]
pub trait TaskListener: Send + Sync + 'static {
    /// The task was accepted for execution.
    fn task_submitted(&self, task: &dyn TaskView, executor: &ManagedExecutorAdapter) {}

    /// A worker picked the task up; user work has not started.
    fn task_starting(&self, task: &dyn TaskView, executor: &ManagedExecutorAdapter) {}

    /// The task reached a terminal state; `failure` is `None` on success.
    fn task_done(&self, task: &dyn TaskView, executor: &ManagedExecutorAdapter, failure: Option<&TaskError>) {}

    /// The task will never run its user work.
    fn task_aborted(&self, task: &dyn TaskView, executor: &ManagedExecutorAdapter, failure: &TaskError) {}
}
