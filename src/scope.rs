//! The scope cache contract and its shared active/closed state machine.

use std::any::type_name;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::error::{ScopeError, ScopeResult, TeardownError};
use crate::factory::{Bean, Creation, Factory};
use crate::instance::AnyArc;
use crate::request::Request;
use crate::{Id, Key, ScopeId};

/// State shared by every scope cache.
///
/// Holds two independent one-way transitions:
///
/// - `Active -> Closed`, flipped by [`mark_closed`](ScopeCore::mark_closed)
/// - `Uninitialized -> Materialized`, the set-once self handle produced by
///   the cache acting as its own factory
///
/// Both are race-safe and never reverse.
pub struct ScopeCore<S> {
    scope_id: ScopeId,
    closed: AtomicBool,
    this: Weak<S>,
    me: OnceCell<Weak<S>>,
}

impl<S> ScopeCore<S> {
    /// `this` must point at the cache that owns this core, as handed out by
    /// [`Arc::new_cyclic`].
    pub fn new(scope_id: ScopeId, this: Weak<S>) -> Self {
        Self {
            scope_id,
            closed: AtomicBool::new(false),
            this,
            me: OnceCell::new(),
        }
    }

    pub fn scope_id(&self) -> &ScopeId {
        &self.scope_id
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flips `closed` to true. Returns true only for the caller that flipped it.
    pub fn mark_closed(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Fails with [`ScopeError::InactiveScope`] once closed.
    pub fn ensure_active(&self) -> ScopeResult<()> {
        if self.closed() {
            Err(ScopeError::InactiveScope)
        } else {
            Ok(())
        }
    }

    /// Strong handle to the owning cache.
    pub fn this(&self) -> Option<Arc<S>> {
        self.this.upgrade()
    }

    /// Sets the self handle if unset; every caller gets the winner's handle.
    pub fn materialize(&self) -> Option<Arc<S>> {
        let candidate = self.this.upgrade()?;
        self.me
            .get_or_init(|| {
                debug!(scope = %self.scope_id, "scope cache materialized");
                Arc::downgrade(&candidate)
            })
            .upgrade()
    }

    /// The materialized self handle, or `None` before first creation.
    pub fn singleton(&self) -> Option<Arc<S>> {
        self.me.get()?.upgrade()
    }
}

/// Runtime object implementing one scope's creation, caching, and
/// destruction policy.
///
/// Every scope cache is also a [`Factory`] of itself: creating it through
/// the ordinary creation protocol materializes the cache as its own
/// singleton, which lets a container register and retrieve scope caches
/// like any other contextual object (see [`bean`](ScopeCache::bean)).
///
/// # Invariants
///
/// - once closed, [`active`](ScopeCache::active) is false forever
/// - [`instance`](ScopeCache::instance), [`remove`](ScopeCache::remove), and
///   lookups fail with [`ScopeError::InactiveScope`] after close
/// - [`close`](ScopeCache::close) is idempotent
pub trait ScopeCache: Factory<Self> + Sized + Send + Sync + 'static {
    /// Shared active/closed and self-handle state.
    fn core(&self) -> &ScopeCore<Self>;

    /// Identity descriptor used to register this cache with a container.
    fn id(&self) -> Id;

    /// Returns the existing value for `id`, or creates one with `factory`.
    ///
    /// All three arguments may be absent to support early bootstrap. Without
    /// a factory only existing values are returned.
    fn instance<I>(
        &self,
        id: Option<&Key>,
        factory: Option<&Arc<dyn Factory<I>>>,
        request: Option<&Arc<dyn Request>>,
    ) -> ScopeResult<Option<Arc<I>>>
    where
        I: Send + Sync + 'static;

    /// Type-erased form of `instance(id, None, None)`.
    fn existing(&self, id: Option<&Key>) -> ScopeResult<Option<AnyArc>>;

    /// The scope this cache implements.
    fn scope_id(&self) -> &ScopeId {
        self.core().scope_id()
    }

    fn active(&self) -> bool {
        !self.core().closed()
    }

    fn closed(&self) -> bool {
        self.core().closed()
    }

    /// Removes and tears down the value stored for `id`.
    ///
    /// Caches that never store anything keep this default: no-op while active.
    fn remove(&self, _id: Option<&Key>) -> ScopeResult<bool> {
        self.core().ensure_active()?;
        Ok(false)
    }

    /// Transitions to closed. Caches holding values must override this to
    /// tear them down and must still go through [`ScopeCore::mark_closed`].
    fn close(&self) -> Result<(), TeardownError> {
        if self.core().mark_closed() {
            debug!(scope = %self.scope_id(), "scope cache closed");
        }
        Ok(())
    }

    /// The materialized self handle, or `None` before first creation.
    fn singleton(&self) -> Option<Arc<Self>> {
        self.core().singleton()
    }

    /// Pairs [`id`](ScopeCache::id) with this cache as its own factory.
    ///
    /// `None` only while the cache is being dropped.
    fn bean(&self) -> Option<Bean<Self>> {
        let this = self.core().this()?;
        Some(Bean::new(self.id(), this as Arc<dyn Factory<Self>>))
    }

    /// Existing value for `id`, downcast to `I`.
    fn get<I>(&self, id: Option<&Key>) -> ScopeResult<Option<Arc<I>>>
    where
        I: Send + Sync + 'static,
    {
        downcast(self.existing(id)?)
    }

    fn contains_id(&self, id: Option<&Key>) -> ScopeResult<bool> {
        Ok(self.existing(id)?.is_some())
    }

    /// Request-based lookup: the creation's bean supplies key and factory.
    ///
    /// Unlike [`get`](ScopeCache::get) this creates the value when absent.
    fn get_for<I>(&self, creation: Option<&Creation<I>>) -> ScopeResult<Option<Arc<I>>>
    where
        I: Send + Sync + 'static,
    {
        match creation {
            Some(creation) => self.instance(
                Some(creation.bean.id.key()),
                Some(&creation.bean.factory),
                creation.request.as_ref(),
            ),
            None => self.instance(None, None, None),
        }
    }

    fn contains_creation<I>(&self, creation: Option<&Creation<I>>) -> ScopeResult<bool>
    where
        I: Send + Sync + 'static,
    {
        Ok(self.get_for(creation)?.is_some())
    }
}

/// Downcasts a stored value to the requested type.
pub(crate) fn downcast<I>(value: Option<AnyArc>) -> ScopeResult<Option<Arc<I>>>
where
    I: Send + Sync + 'static,
{
    value
        .map(|value| value.downcast::<I>().map_err(|_| ScopeError::TypeMismatch(type_name::<I>())))
        .transpose()
}

/// Implements the self-factory protocol for scope cache types.
macro_rules! impl_self_factory {
    ($($cache:ty),* $(,)?) => {
        $(
            impl $crate::factory::Factory<$cache> for $cache {
                fn create(
                    &self,
                    _request: Option<&dyn $crate::request::Request>,
                ) -> Result<Option<std::sync::Arc<$cache>>, $crate::error::BoxError> {
                    Ok($crate::scope::ScopeCache::core(self).materialize())
                }

                fn destroy(
                    &self,
                    instance: &std::sync::Arc<$cache>,
                    _request: Option<&dyn $crate::request::Request>,
                ) -> Result<(), $crate::error::BoxError> {
                    $crate::scope::ScopeCache::close(&**instance).map_err(Into::into)
                }

                fn destroys(&self) -> bool {
                    true
                }
            }

            impl PartialEq for $cache {
                fn eq(&self, other: &Self) -> bool {
                    use $crate::scope::ScopeCache;
                    self.id() == other.id() && self.scope_id() == other.scope_id()
                }
            }

            impl Eq for $cache {}

            impl std::hash::Hash for $cache {
                fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                    use $crate::scope::ScopeCache;
                    std::hash::Hash::hash(&self.id(), state);
                    std::hash::Hash::hash(self.scope_id(), state);
                }
            }
        )*
    };
}

pub(crate) use impl_self_factory;
