//! # Clotho - Spinning the Threads of Managed Work
//!
//! Clotho is a managed executor for Rust. Work submitted to it becomes a
//! *managed task*: a unit with an observable lifecycle, the submitter's ambient
//! context carried onto the worker thread, and a completion that can be
//! consumed in finishing order.
//!
//! ## Features
//!
//! - **Managed lifecycle**: every task moves forward through
//!   submitted, starting, running and a terminal state, observable through a
//!   [`TaskListener`]
//! - **Context propagation**: a [`ContextProvider`] captures context at submit
//!   time and applies it around the task on the worker
//! - **Elastic pool**: core and maximum sizes, idle keep-alive, an optional
//!   thread lifetime cap, and hand-off, bounded or unbounded queues
//! - **Rejection policies**: abort, retry-then-abort, or a custom
//!   [`RejectionHandler`]
//! - **Hang detection**: tasks running past a threshold are reported, never killed
//! - **Completion service**: finished tasks delivered in the order they finished
//! - **Cooperative interruption**: cancelled and stopped work observes
//!   [`interrupt::check_interrupted`]
//!
//! # Examples
//!
//! ```
//! use clotho::prelude::*;
//! use std::time::Duration;
//!
//! let executor = ManagedExecutor::builder()
//!     .name("orders")
//!     .core_pool_size(2)
//!     .max_pool_size(4)
//!     .build()
//!     .unwrap();
//!
//! let service = executor.completion_service::<u64>();
//! for n in 1..=3_u64 {
//!     service.submit(move || Ok(n * 10)).unwrap();
//! }
//!
//! let mut total = 0;
//! for _ in 0..3 {
//!     total += service.take().unwrap().get().unwrap();
//! }
//! assert_eq!(total, 60);
//!
//! executor.shutdown();
//! assert!(executor.await_termination(Duration::from_secs(5)));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

// Re-export core functionality
pub use clotho_core::{
    config, context, error, interrupt, reject, Admission, AdmissionAttempt, BoxError, ContextHandle,
    ContextProvider, ContextService, ExecutorConfig, ExecutorConfigBuilder, ExecutorError, ExecutorResult,
    InterruptHandle, Interrupted, LocalContextProvider, PanicError, QueueCapacity, QueueKind, RejectPolicy,
    RejectionHandler, TaskError, TaskId, TaskResult, TaskState,
};

// Re-export executor functionality
pub use clotho_executor::{
    CompletionQueue, CompletionService, ExecutorBuilder, ManagedExecutor, ManagedExecutorAdapter, ManagedTask,
    ManagedThread, ManagedThreadFactory, ManagedThreadPool, PoolPhase, TaskListener, TaskTimings, TaskView,
};

pub mod prelude {
    //! Common imports for Clotho users.

    pub use crate::{
        BoxError, CompletionService, ExecutorConfig, ExecutorError, ManagedExecutor, ManagedExecutorAdapter,
        ManagedTask, RejectPolicy, TaskError, TaskListener, TaskState, TaskView,
    };
}
