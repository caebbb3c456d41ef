//! Cooperative interruption of managed worker threads.
//!
//! Every worker spawned by the thread factory owns an [`InterruptHandle`] and
//! installs it in a thread-local slot before running any task. Cancelling a
//! running task or shutting the pool down abruptly raises the flag and unparks
//! the thread; user code observes it through [`is_interrupted`],
//! [`check_interrupted`] or the interruptible [`sleep`].
//!
//! Threads that are not managed workers have no handle: the query functions
//! report "not interrupted" and [`sleep`] degrades to a plain sleep.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use thiserror::Error;

thread_local! {
    static CURRENT: RefCell<Option<InterruptHandle>> = const { RefCell::new(None) };
}

/// Returned by interruptible operations when the current worker was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Error)]
#[error("thread was interrupted")]
pub struct Interrupted;

struct Inner {
    flag: AtomicBool,
    thread: OnceLock<Thread>,
}

/// Shared interrupt flag bound to one worker thread.
#[derive(Clone)]
pub struct InterruptHandle {
    inner: Arc<Inner>,
}

impl InterruptHandle {
    /// Create an unbound handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                thread: OnceLock::new(),
            }),
        }
    }

    /// Bind this handle to the calling thread and make it the thread's current handle.
    pub fn install(&self) {
        let _ = self.inner.thread.set(thread::current());
        CURRENT.with(|slot| *slot.borrow_mut() = Some(self.clone()));
    }

    /// Raise the flag and wake the bound thread if it is parked.
    pub fn interrupt(&self) {
        self.inner.flag.store(true, Ordering::Release);
        if let Some(thread) = self.inner.thread.get() {
            thread.unpark();
        }
    }

    /// Whether the flag is raised.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// Lower the flag, returning whether it was raised.
    pub fn clear(&self) -> bool {
        self.inner.flag.swap(false, Ordering::AcqRel)
    }

    /// Whether two handles refer to the same flag.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for InterruptHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

/// The handle installed on the calling thread, if it is a managed worker.
#[must_use]
pub fn current() -> Option<InterruptHandle> {
    CURRENT.with(|slot| slot.borrow().clone())
}

/// Whether the calling worker has been interrupted.
#[must_use]
pub fn is_interrupted() -> bool {
    CURRENT.with(|slot| slot.borrow().as_ref().is_some_and(InterruptHandle::is_interrupted))
}

/// Fail with [`Interrupted`] if the calling worker has been interrupted.
///
/// # Errors
///
/// Returns [`Interrupted`] when the current thread's flag is raised.
pub fn check_interrupted() -> Result<(), Interrupted> {
    if is_interrupted() {
        Err(Interrupted)
    } else {
        Ok(())
    }
}

/// Sleep for `duration`, returning early with [`Interrupted`] if the worker is interrupted.
///
/// # Errors
///
/// Returns [`Interrupted`] when the flag is raised before or during the sleep.
pub fn sleep(duration: Duration) -> Result<(), Interrupted> {
    let Some(handle) = current() else {
        thread::sleep(duration);
        return Ok(());
    };

    let deadline = Instant::now() + duration;
    loop {
        if handle.is_interrupted() {
            return Err(Interrupted);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::park_timeout(deadline - now);
    }
}
