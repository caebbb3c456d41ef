//! Error types and handling for the Clotho executor.

use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error type returned by user callables.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared, cloneable form of a user failure.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors delivered to holders of a task's future.
///
/// Cloneable so that every `get` on the same future observes the same failure;
/// the user's cause is kept behind an `Arc` and preserved verbatim.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// Task was cancelled, either while queued or while running
    #[error("Task was cancelled")]
    Cancelled,
    /// User work returned an error or panicked
    #[error("Task failed: {0}")]
    TaskFailed(SharedError),
    /// Task never ran because context setup failed
    #[error("Task aborted: {0}")]
    Aborted(SharedError),
    /// Task was refused at admission
    #[error("Task rejected: {0}")]
    Rejected(String),
    /// A bounded wait for the result elapsed
    #[error("Timed out waiting for task result")]
    Timeout,
    /// A blocking call was released by interruption
    #[error("Interrupted while waiting")]
    Interrupted,
}

impl TaskError {
    /// Wrap a user error as a task failure.
    pub fn failed(cause: impl Into<BoxError>) -> Self {
        let boxed: BoxError = cause.into();
        Self::TaskFailed(Arc::from(boxed))
    }

    /// Wrap a context setup error as an abort.
    pub fn aborted(cause: impl Into<BoxError>) -> Self {
        let boxed: BoxError = cause.into();
        Self::Aborted(Arc::from(boxed))
    }

    /// The preserved user or context cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            Self::TaskFailed(cause) | Self::Aborted(cause) => Some(cause.as_ref()),
            _ => None,
        }
    }

    /// Whether this failure is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A panic raised by user work, captured as an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task panicked: {message}")]
pub struct PanicError {
    message: String,
}

impl PanicError {
    /// Build from a panic payload as returned by `catch_unwind`.
    #[must_use]
    pub fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }

    /// The panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors surfaced synchronously by executor operations.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// A construction parameter or argument is invalid
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The operation is not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// Lifecycle operation attempted through a restricted handle
    #[error("Operation not permitted: {0}")]
    NotPermitted(&'static str),
    /// Admission refused by the rejection policy
    #[error("Task rejected: {0}")]
    Rejected(String),
    /// The thread factory failed to start a worker
    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(String),
}

impl From<ExecutorError> for TaskError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Rejected(reason) => Self::Rejected(reason),
            other => Self::aborted(other),
        }
    }
}

/// A result type for task outcomes.
pub type TaskResult<T> = Result<T, TaskError>;

/// A result type for executor operations.
pub type ExecutorResult<T> = Result<T, ExecutorError>;
