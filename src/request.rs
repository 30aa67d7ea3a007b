//! Request contexts and teardown registries.
//!
//! A request is the call context that triggered a creation. It may expose a
//! [`Registry`] that takes ownership of teardown for values the scope cache
//! itself does not keep, and it may release resources held on behalf of a
//! value once that value is torn down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{ReleaseError, TeardownError};
use crate::instance::Teardown;

/// Context of the call that asked a scope cache for a value.
pub trait Request: Send + Sync {
    /// Registration capability, if this request can own teardown.
    fn registry(&self) -> Option<&dyn Registry> {
        None
    }

    /// Releases whatever this request holds for the value it created.
    ///
    /// Called once, after the value's destructor, when the value is torn down.
    fn release(&self) -> Result<(), ReleaseError> {
        Ok(())
    }
}

/// Accepts teardown-capable handles and closes them when it closes itself.
pub trait Registry: Send + Sync {
    fn register(&self, handle: Arc<dyn Teardown>);
}

/// Container for teardown handles with LIFO execution order.
///
/// Handles registered after the registry was closed are torn down
/// immediately, so nothing registered here outlives it.
///
/// # Examples
///
/// ```rust
/// use ferrous_scopes::{Dependents, ManagedInstance, Teardown};
/// use std::sync::Arc;
///
/// let dependents = Dependents::new();
/// let instance = Arc::new(ManagedInstance::new(Some(Arc::new(7u8)), None, None));
/// dependents.push(instance.clone());
///
/// dependents.close().unwrap();
/// assert!(instance.closed());
/// ```
#[derive(Default)]
pub struct Dependents {
    handles: Mutex<Vec<Arc<dyn Teardown>>>,
    closed: AtomicBool,
}

impl Dependents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a teardown handle.
    pub fn push(&self, handle: Arc<dyn Teardown>) {
        {
            let mut handles = self.handles.lock();
            if !self.closed.load(Ordering::Acquire) {
                handles.push(handle);
                return;
            }
        }
        // Closed: the caller still expects the handle to be torn down.
        if let Err(error) = handle.close() {
            warn!(%error, "dependent registered after close failed to tear down");
        }
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes every handle in reverse registration order, once.
    ///
    /// All handles are attempted; failures are aggregated.
    pub fn close(&self) -> Result<(), TeardownError> {
        let handles = {
            let mut handles = self.handles.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            std::mem::take(&mut *handles)
        };
        debug!(count = handles.len(), "closing dependents");

        let failures: Vec<TeardownError> = handles
            .iter()
            .rev()
            .filter_map(|handle| handle.close().err())
            .collect();
        TeardownError::aggregate(failures)
    }
}

impl Registry for Dependents {
    fn register(&self, handle: Arc<dyn Teardown>) {
        self.push(handle);
    }
}

impl Teardown for Dependents {
    fn close(&self) -> Result<(), TeardownError> {
        Dependents::close(self)
    }

    fn closed(&self) -> bool {
        Dependents::closed(self)
    }
}

impl std::fmt::Debug for Dependents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependents")
            .field("handles", &format!("{} handles", self.len()))
            .field("closed", &self.closed())
            .finish()
    }
}

type ReleaseHook = Box<dyn Fn() -> Result<(), ReleaseError> + Send + Sync>;

/// Concrete [`Request`]: optional dependents registry plus optional release hook.
///
/// ```rust
/// use ferrous_scopes::{Dependents, Request, RequestContext};
/// use std::sync::Arc;
///
/// let dependents = Arc::new(Dependents::new());
/// let request = RequestContext::new().with_dependents(dependents.clone());
/// assert!(request.registry().is_some());
/// assert!(RequestContext::new().registry().is_none());
/// ```
#[derive(Default)]
pub struct RequestContext {
    dependents: Option<Arc<Dependents>>,
    release: Option<ReleaseHook>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dependents(mut self, dependents: Arc<Dependents>) -> Self {
        self.dependents = Some(dependents);
        self
    }

    pub fn with_release<F>(mut self, release: F) -> Self
    where
        F: Fn() -> Result<(), ReleaseError> + Send + Sync + 'static,
    {
        self.release = Some(Box::new(release));
        self
    }

    pub fn dependents(&self) -> Option<&Arc<Dependents>> {
        self.dependents.as_ref()
    }

    /// Erases the context into the shared form scope caches accept.
    pub fn shared(self) -> Arc<dyn Request> {
        Arc::new(self)
    }
}

impl Request for RequestContext {
    fn registry(&self) -> Option<&dyn Registry> {
        self.dependents.as_deref().map(|d| d as &dyn Registry)
    }

    fn release(&self) -> Result<(), ReleaseError> {
        match &self.release {
            Some(release) => release(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::ManagedInstance;

    #[test]
    fn dependents_close_in_lifo_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let dependents = Dependents::new();

        for name in ["first", "second", "third"] {
            let order = order.clone();
            let destructor: crate::Destructor<&'static str> = Box::new(move |value, _| {
                order.lock().push(**value);
                Ok(())
            });
            dependents.push(Arc::new(ManagedInstance::new(Some(Arc::new(name)), Some(destructor), None)));
        }

        dependents.close().unwrap();
        assert_eq!(*order.lock(), vec!["third", "second", "first"]);
        assert!(dependents.is_empty());
    }

    #[test]
    fn push_after_close_tears_down_immediately() {
        let dependents = Dependents::new();
        dependents.close().unwrap();

        let instance = Arc::new(ManagedInstance::new(Some(Arc::new(1i32)), None, None));
        dependents.push(instance.clone());
        assert!(instance.closed());
        assert!(dependents.is_empty());
    }
}
