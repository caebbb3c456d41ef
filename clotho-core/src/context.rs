//! Context propagation from submitting thread to worker thread.
//!
//! A [`ContextProvider`] captures the submitter's ambient state into an opaque
//! [`ContextHandle`] at submit time. On the worker, the handle is applied for
//! the duration of the task and the previous state is restored afterwards.
//! [`AppliedContext`] is the scoped guard: dropping it restores, so restoration
//! happens on every exit path, including unwinding.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::BoxError;

/// Opaque snapshot of ambient execution context.
#[derive(Clone)]
pub struct ContextHandle(Arc<dyn Any + Send + Sync>);

impl ContextHandle {
    /// Wrap a captured value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Borrow the captured value as `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContextHandle(..)")
    }
}

/// State needed to undo an `apply`, handed back to `restore`.
pub struct RestorationToken(Box<dyn Any + Send>);

impl RestorationToken {
    /// Wrap the state to restore.
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// Recover the wrapped state.
    ///
    /// # Errors
    ///
    /// Returns the token unchanged if it does not hold a `T`.
    pub fn into_inner<T: Any>(self) -> Result<T, Self> {
        self.0.downcast::<T>().map(|v| *v).map_err(Self)
    }
}

impl fmt::Debug for RestorationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RestorationToken(..)")
    }
}

/// Host-supplied capture/apply/restore hooks.
///
/// `apply` and `restore` are always paired; `restore` is called even when the
/// task's work fails or panics.
pub trait ContextProvider: Send + Sync + 'static {
    /// Snapshot the calling thread's context.
    fn capture(&self) -> ContextHandle;

    /// Install a captured context on the calling thread.
    ///
    /// # Errors
    ///
    /// A failure aborts the task before user work runs.
    fn apply(&self, handle: &ContextHandle) -> Result<RestorationToken, BoxError>;

    /// Undo a previous `apply` on the same thread.
    fn restore(&self, token: RestorationToken);

    /// Provider name for diagnostics.
    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// A named context service wrapping a provider.
#[derive(Clone)]
pub struct ContextService {
    name: String,
    provider: Arc<dyn ContextProvider>,
}

impl ContextService {
    /// Create a service over `provider`.
    pub fn new(name: impl Into<String>, provider: impl ContextProvider) -> Self {
        Self {
            name: name.into(),
            provider: Arc::new(provider),
        }
    }

    /// Create a service over a shared provider.
    pub fn from_shared(name: impl Into<String>, provider: Arc<dyn ContextProvider>) -> Self {
        Self {
            name: name.into(),
            provider,
        }
    }

    /// The service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capture the calling thread's context.
    #[must_use]
    pub fn capture(&self) -> CapturedContext {
        CapturedContext {
            service: self.clone(),
            handle: self.provider.capture(),
        }
    }
}

impl fmt::Debug for ContextService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextService")
            .field("name", &self.name)
            .field("provider", &self.provider.name())
            .finish()
    }
}

/// A captured handle together with the service that knows how to apply it.
#[derive(Clone, Debug)]
pub struct CapturedContext {
    service: ContextService,
    handle: ContextHandle,
}

impl CapturedContext {
    /// The captured handle.
    #[must_use]
    pub fn handle(&self) -> &ContextHandle {
        &self.handle
    }

    /// Apply on the calling thread; the returned guard restores on drop.
    ///
    /// # Errors
    ///
    /// Propagates the provider's `apply` failure.
    pub fn apply(&self) -> Result<AppliedContext<'_>, BoxError> {
        let token = self.service.provider.apply(&self.handle)?;
        Ok(AppliedContext {
            provider: self.service.provider.as_ref(),
            token: Some(token),
        })
    }
}

/// Scoped application of a captured context.
#[must_use = "dropping the guard restores the previous context immediately"]
pub struct AppliedContext<'a> {
    provider: &'a dyn ContextProvider,
    token: Option<RestorationToken>,
}

impl Drop for AppliedContext<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.provider.restore(token);
        }
    }
}

thread_local! {
    static LOCAL: RefCell<HashMap<String, String>> = RefCell::new(HashMap::new());
}

/// Propagates a thread-local string map (identity, locale, tenant, ...).
///
/// Values are set on the submitting thread with [`local::set`]; tasks read them
/// with [`local::get`] on the worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalContextProvider;

impl ContextProvider for LocalContextProvider {
    fn capture(&self) -> ContextHandle {
        ContextHandle::new(local::snapshot())
    }

    fn apply(&self, handle: &ContextHandle) -> Result<RestorationToken, BoxError> {
        let captured = handle
            .downcast_ref::<HashMap<String, String>>()
            .ok_or("context handle was not captured by LocalContextProvider")?
            .clone();
        let previous = LOCAL.with(|map| std::mem::replace(&mut *map.borrow_mut(), captured));
        Ok(RestorationToken::new(previous))
    }

    fn restore(&self, token: RestorationToken) {
        if let Ok(previous) = token.into_inner::<HashMap<String, String>>() {
            LOCAL.with(|map| *map.borrow_mut() = previous);
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Accessors for the thread-local map carried by [`LocalContextProvider`].
pub mod local {
    use super::LOCAL;
    use std::collections::HashMap;

    /// Set a value on the calling thread.
    pub fn set(key: impl Into<String>, value: impl Into<String>) {
        LOCAL.with(|map| {
            map.borrow_mut().insert(key.into(), value.into());
        });
    }

    /// Read a value on the calling thread.
    #[must_use]
    pub fn get(key: &str) -> Option<String> {
        LOCAL.with(|map| map.borrow().get(key).cloned())
    }

    /// Remove a value on the calling thread.
    pub fn remove(key: &str) -> Option<String> {
        LOCAL.with(|map| map.borrow_mut().remove(key))
    }

    /// Copy of the calling thread's map.
    #[must_use]
    pub fn snapshot() -> HashMap<String, String> {
        LOCAL.with(|map| map.borrow().clone())
    }
}
