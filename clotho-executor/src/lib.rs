//! Managed executor implementation for Clotho.
//!
//! - [`ManagedExecutor`] accepts work, wraps it in [`ManagedTask`]s and runs
//!   them on a [`ManagedThreadPool`]
//! - [`ManagedExecutorAdapter`] is the restricted view tasks and listeners see
//! - [`CompletionService`] hands finished tasks back in finishing order
//! - [`TaskListener`] observes each task's lifecycle

#![deny(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod completion;
pub mod executor;
pub mod listener;
pub mod pool;
mod queue;
pub mod task;
pub mod thread_factory;

pub use completion::{CompletionQueue, CompletionService};
pub use executor::{ExecutorBuilder, ManagedExecutor, ManagedExecutorAdapter};
pub use listener::TaskListener;
pub use pool::{ManagedThreadPool, PoolPhase};
pub use task::{ManagedTask, TaskTimings, TaskView};
pub use thread_factory::{ManagedThread, ManagedThreadFactory};
