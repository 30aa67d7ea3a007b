//! Managed instances: a created value plus exactly-once teardown.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{BoxError, ReleaseError, ScopeError, ScopeResult, TeardownCause, TeardownError};
use crate::factory::Factory;
use crate::request::Request;

/// Type-erased shared value, as stored by scope caches.
pub type AnyArc = Arc<dyn Any + Send + Sync>;

/// Destroys a value, given the request that created it (if any).
pub type Destructor<I> = Box<dyn Fn(&Arc<I>, Option<&dyn Request>) -> Result<(), BoxError> + Send + Sync>;

/// Releases whatever a value depends on.
pub type Releaser = Box<dyn Fn() -> Result<(), ReleaseError> + Send + Sync>;

/// A handle that can be torn down exactly once.
///
/// `close` is idempotent: the first call runs teardown, later calls return
/// `Ok(())` without doing anything.
pub trait Teardown: Send + Sync {
    fn close(&self) -> Result<(), TeardownError>;

    fn closed(&self) -> bool;
}

/// One created value together with its destructor and releaser.
///
/// Teardown runs exactly once no matter how many threads call
/// [`close`](ManagedInstance::close). The destructor runs first with the
/// creation request as context, then the releaser; both always run, and
/// their failures are aggregated into a single [`TeardownError`].
///
/// Equality and hashing look at the value only, never at the closed flag.
/// An absent value is its own well-defined case.
///
/// # Examples
///
/// ```rust
/// use ferrous_scopes::{ManagedInstance, ScopeError};
/// use std::sync::Arc;
///
/// let instance = ManagedInstance::new(Some(Arc::new(String::from("pool"))), None, None);
/// assert_eq!(instance.get().unwrap().as_deref().map(String::as_str), Some("pool"));
///
/// instance.close().unwrap();
/// instance.close().unwrap(); // no-op
/// assert!(matches!(instance.get(), Err(ScopeError::AlreadyClosed)));
/// ```
pub struct ManagedInstance<I> {
    value: Option<Arc<I>>,
    destructor: Destructor<I>,
    releaser: Releaser,
    creation_request: Option<Arc<dyn Request>>,
    closed: AtomicBool,
}

impl<I: Send + Sync + 'static> ManagedInstance<I> {
    /// Wraps a value; the creation request, if any, acts as the releaser.
    pub fn new(
        value: Option<Arc<I>>,
        destructor: Option<Destructor<I>>,
        creation_request: Option<Arc<dyn Request>>,
    ) -> Self {
        let releaser = creation_request.as_ref().map(|request| {
            let request = Arc::clone(request);
            let releaser: Releaser = Box::new(move || request.release());
            releaser
        });
        Self::with_releaser(value, destructor, releaser, creation_request)
    }

    /// Wraps a value with an explicit releaser.
    pub fn with_releaser(
        value: Option<Arc<I>>,
        destructor: Option<Destructor<I>>,
        releaser: Option<Releaser>,
        creation_request: Option<Arc<dyn Request>>,
    ) -> Self {
        Self {
            value,
            destructor: destructor.unwrap_or_else(|| Box::new(|_, _| Ok(()))),
            releaser: releaser.unwrap_or_else(|| Box::new(|| Ok(()))),
            creation_request,
            closed: AtomicBool::new(false),
        }
    }

    /// Wraps a factory product; the destructor is the factory's own when it
    /// [`destroys`](Factory::destroys).
    pub fn from_factory(
        value: Option<Arc<I>>,
        factory: &Arc<dyn Factory<I>>,
        creation_request: Option<Arc<dyn Request>>,
    ) -> Self {
        let destructor = factory.destroys().then(|| {
            let factory = Arc::clone(factory);
            let destructor: Destructor<I> = Box::new(move |value, request| factory.destroy(value, request));
            destructor
        });
        Self::new(value, destructor, creation_request)
    }

    /// The wrapped value, unless this instance was closed.
    pub fn get(&self) -> ScopeResult<Option<Arc<I>>> {
        if self.closed() {
            return Err(ScopeError::AlreadyClosed);
        }
        Ok(self.value.clone())
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tears the instance down, once.
    ///
    /// Only the caller that flips the closed flag runs teardown. A failing
    /// destructor becomes the primary cause; a failing releaser is then
    /// suppressed on it, or becomes the primary itself. An interrupted
    /// release surfaces as [`TeardownCause::Interrupted`].
    pub fn close(&self) -> Result<(), TeardownError> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let mut failure: Option<TeardownError> = None;
        if let Some(value) = &self.value {
            if let Err(error) = (self.destructor)(value, self.creation_request.as_deref()) {
                failure = Some(TeardownCause::Destructor(error).into());
            }
        }

        if let Err(error) = (self.releaser)() {
            let cause = match error {
                ReleaseError::Interrupted(reason) => TeardownCause::Interrupted(reason),
                ReleaseError::Failed(error) => TeardownCause::Release(error),
            };
            match failure.as_mut() {
                Some(primary) => primary.suppress(cause),
                None => failure = Some(cause.into()),
            }
        }

        match failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}

impl<I: Send + Sync + 'static> Teardown for ManagedInstance<I> {
    fn close(&self) -> Result<(), TeardownError> {
        ManagedInstance::close(self)
    }

    fn closed(&self) -> bool {
        ManagedInstance::closed(self)
    }
}

/// Type-erased view of a [`ManagedInstance`] kept in a cache's store.
pub(crate) trait StoredInstance: Teardown {
    fn any_value(&self) -> ScopeResult<Option<AnyArc>>;
}

impl<I: Send + Sync + 'static> StoredInstance for ManagedInstance<I> {
    fn any_value(&self) -> ScopeResult<Option<AnyArc>> {
        Ok(self.get()?.map(|value| value as AnyArc))
    }
}

impl<I: PartialEq> PartialEq for ManagedInstance<I> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<I: Eq> Eq for ManagedInstance<I> {}

impl<I: Hash> Hash for ManagedInstance<I> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Option's discriminant keeps an absent value distinct.
        self.value.hash(state);
    }
}

impl<I: fmt::Debug> fmt::Debug for ManagedInstance<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedInstance")
            .field("value", &self.value)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::sync::atomic::AtomicUsize;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn equality_ignores_closed_flag() {
        let a = ManagedInstance::new(Some(Arc::new(5u32)), None, None);
        let b = ManagedInstance::new(Some(Arc::new(5u32)), None, None);
        b.close().unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn absent_values_compare_equal_to_each_other_only() {
        let none_a: ManagedInstance<u32> = ManagedInstance::new(None, None, None);
        let none_b: ManagedInstance<u32> = ManagedInstance::new(None, None, None);
        let some = ManagedInstance::new(Some(Arc::new(0u32)), None, None);
        assert_eq!(none_a, none_b);
        assert_eq!(hash_of(&none_a), hash_of(&none_b));
        assert_ne!(none_a, some);
    }

    #[test]
    fn absent_value_skips_destructor_but_releases() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        let d = destroyed.clone();
        let r = released.clone();
        let destructor: Destructor<u8> = Box::new(move |_, _| {
            d.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let releaser: Releaser = Box::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let instance = ManagedInstance::with_releaser(None, Some(destructor), Some(releaser), None);

        instance.close().unwrap();
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn releaser_failure_becomes_primary_when_destructor_succeeds() {
        let releaser: Releaser = Box::new(|| Err(ReleaseError::Failed("socket busy".into())));
        let instance = ManagedInstance::with_releaser(Some(Arc::new(())), None, Some(releaser), None);

        let err = instance.close().unwrap_err();
        assert!(matches!(err.primary(), TeardownCause::Release(e) if e.to_string() == "socket busy"));
        assert!(err.suppressed().is_empty());
    }
}
