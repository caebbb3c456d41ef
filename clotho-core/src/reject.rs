//! Rejection policies applied when the pool cannot admit a task.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::TaskId;

/// Default pause before a `RetryAbort` retry.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of a rejection handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The task was admitted after all
    Admitted,
    /// The task is refused; the reason is reported to the submitter
    Rejected(String),
}

/// The refused task together with the pool that refused it.
pub trait AdmissionAttempt {
    /// The refused task.
    fn task_id(&self) -> TaskId;

    /// Name of the refusing pool.
    fn pool_name(&self) -> &str;

    /// Whether the pool has stopped accepting work.
    fn is_shutdown(&self) -> bool;

    /// Run the admission rules again; `true` if the task was admitted.
    fn retry(&mut self) -> bool;
}

/// Strategy invoked when admission fails.
pub trait RejectionHandler: Send + Sync + 'static {
    /// Decide the fate of a refused task.
    fn on_reject(&self, attempt: &mut dyn AdmissionAttempt) -> Admission;
}

/// Built-in rejection policies.
#[derive(Clone)]
pub enum RejectPolicy {
    /// Fail the submission immediately
    Abort,
    /// Retry admission `attempts` times, pausing `interval` before each, then fail
    RetryAbort {
        /// Number of retries
        attempts: u32,
        /// Pause before each retry
        interval: Duration,
    },
    /// A user-supplied strategy
    Custom(Arc<dyn RejectionHandler>),
}

impl RejectPolicy {
    /// `RetryAbort` with a single retry after [`DEFAULT_RETRY_INTERVAL`].
    #[must_use]
    pub const fn retry_abort() -> Self {
        Self::RetryAbort {
            attempts: 1,
            interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl Default for RejectPolicy {
    fn default() -> Self {
        Self::Abort
    }
}

impl fmt::Debug for RejectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => write!(f, "Abort"),
            Self::RetryAbort { attempts, interval } => f
                .debug_struct("RetryAbort")
                .field("attempts", attempts)
                .field("interval", interval)
                .finish(),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl RejectionHandler for RejectPolicy {
    fn on_reject(&self, attempt: &mut dyn AdmissionAttempt) -> Admission {
        match self {
            Self::Abort => Admission::Rejected(format!(
                "{} refused {}: no worker or queue slot available",
                attempt.pool_name(),
                attempt.task_id()
            )),
            Self::RetryAbort { attempts, interval } => {
                for _ in 0..*attempts {
                    if attempt.is_shutdown() {
                        break;
                    }
                    thread::sleep(*interval);
                    if attempt.retry() {
                        return Admission::Admitted;
                    }
                }
                Admission::Rejected(format!(
                    "{} refused {} after {} retries",
                    attempt.pool_name(),
                    attempt.task_id(),
                    attempts
                ))
            }
            Self::Custom(handler) => handler.on_reject(attempt),
        }
    }
}
