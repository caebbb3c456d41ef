//! # Clotho Core
//!
//! Core abstractions for the Clotho managed executor.
//!
//! Named after the Fate who spins the thread of life, Clotho spins worker threads
//! for managed tasks: units of work whose lifecycle is tracked, whose submitter's
//! context travels with them, and whose completion can be observed in order.
//!
//! This crate holds the pieces shared by every layer:
//!
//! - [`TaskId`] and [`TaskState`], the identity and lifecycle of a managed task
//! - [`error`], the error taxonomy delivered to submitters and future holders
//! - [`config`], executor construction parameters and their builder
//! - [`context`], the capture/apply/restore interface for ambient context
//! - [`interrupt`], cooperative interruption of worker threads
//! - [`reject`], strategies applied when the pool refuses a task

#![deny(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod config;
pub mod context;
pub mod error;
pub mod interrupt;
pub mod reject;

pub use config::{ExecutorConfig, ExecutorConfigBuilder, QueueCapacity, QueueKind};
pub use context::{ContextHandle, ContextProvider, ContextService, LocalContextProvider};
pub use error::{BoxError, ExecutorError, ExecutorResult, PanicError, TaskError, TaskResult};
pub use interrupt::{InterruptHandle, Interrupted};
pub use reject::{Admission, AdmissionAttempt, RejectPolicy, RejectionHandler};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for managed tasks within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Create a task ID from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocate the next process-wide task ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Lifecycle states of a managed task.
///
/// Transitions only move forward:
///
/// ```text
/// Created -> Submitted -> Starting -> Running -> Succeeded | Failed | Cancelled
///                      |            \-> Aborted
///                      |-> CancelledBeforeStart
///                      \-> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Built but not yet handed to an executor
    Created,
    /// Accepted by the executor and waiting for a worker
    Submitted,
    /// Picked up by a worker; listener and context are being set up
    Starting,
    /// User work is executing
    Running,
    /// User work returned a value
    Succeeded,
    /// User work returned an error or panicked
    Failed,
    /// Cancelled while still queued
    CancelledBeforeStart,
    /// Cancelled while running; the worker finished after the cancel request
    Cancelled,
    /// Never ran user work: context setup failed or admission was refused
    Aborted,
}

impl TaskState {
    /// Whether no further transition can happen from this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::CancelledBeforeStart | Self::Cancelled | Self::Aborted
        )
    }

    /// Whether this terminal state is one of the cancelled states.
    #[must_use]
    pub const fn is_cancelled(self) -> bool {
        matches!(self, Self::CancelledBeforeStart | Self::Cancelled)
    }

    /// Position in the forward-only lifecycle. A task only ever moves to a
    /// state of strictly higher rank.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Submitted => 1,
            Self::Starting => 2,
            Self::Running => 3,
            Self::Succeeded | Self::Failed | Self::CancelledBeforeStart | Self::Cancelled | Self::Aborted => 4,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Submitted => write!(f, "Submitted"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
            Self::CancelledBeforeStart => write!(f, "CancelledBeforeStart"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}
