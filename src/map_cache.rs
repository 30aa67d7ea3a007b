//! Memoizing scope caches backed by an identity-keyed concurrent store.
//!
//! Each identity maps to a set-once cell. Looking up or inserting the cell
//! only touches the store's shard lock briefly; the factory runs outside of
//! it, on the cell, so unrelated identities never wait on each other while
//! concurrent first requests for the same identity collapse into a single
//! factory invocation.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{ScopeError, ScopeResult, TeardownError};
use crate::factory::Factory;
use crate::instance::{AnyArc, ManagedInstance, StoredInstance, Teardown};
use crate::key::key_of_type;
use crate::request::Request;
use crate::scope::{downcast, impl_self_factory, ScopeCache, ScopeCore};
use crate::{Id, Key, ScopeId};

type Slot = Arc<OnceCell<Arc<dyn StoredInstance>>>;

#[cfg(feature = "ahash")]
type Store = DashMap<Key, Slot, ahash::RandomState>;
#[cfg(not(feature = "ahash"))]
type Store = DashMap<Key, Slot>;

/// Why a slot was left empty.
enum Vacant {
    /// The factory produced no value.
    Absent,
    Failed(ScopeError),
}

/// Identity store shared by [`MapCache`] and [`SingletonCache`].
#[derive(Default)]
pub(crate) struct MapStore {
    slots: Store,
}

impl MapStore {
    fn stored(&self, id: &Key) -> Option<Arc<dyn StoredInstance>> {
        let slot = self.slots.get(id).map(|entry| Arc::clone(entry.value()))?;
        slot.get().cloned()
    }

    pub(crate) fn existing<S>(&self, core: &ScopeCore<S>, id: Option<&Key>) -> ScopeResult<Option<AnyArc>> {
        core.ensure_active()?;
        match id.and_then(|id| self.stored(id)) {
            Some(stored) => stored.any_value(),
            None => Ok(None),
        }
    }

    pub(crate) fn instance<S, I>(
        &self,
        core: &ScopeCore<S>,
        id: Option<&Key>,
        factory: Option<&Arc<dyn Factory<I>>>,
        request: Option<&Arc<dyn Request>>,
    ) -> ScopeResult<Option<Arc<I>>>
    where
        I: Send + Sync + 'static,
    {
        core.ensure_active()?;
        let Some(id) = id else {
            return Ok(None);
        };
        if let Some(stored) = self.stored(id) {
            return downcast(stored.any_value()?);
        }
        let Some(factory) = factory else {
            return Ok(None);
        };

        let slot = Arc::clone(self.slots.entry(id.clone()).or_default().value());
        let created = slot.get_or_try_init(|| {
            let value = factory
                .create(request.map(|r| &**r))
                .map_err(|e| Vacant::Failed(ScopeError::Creation(e)))?
                .ok_or(Vacant::Absent)?;
            debug!(key = %id, scope = %core.scope_id(), "created instance");
            let instance = ManagedInstance::from_factory(Some(value), factory, request.cloned());
            Ok::<Arc<dyn StoredInstance>, Vacant>(Arc::new(instance))
        });
        let stored = match created {
            Ok(stored) => Arc::clone(stored),
            Err(Vacant::Absent) => return Ok(None),
            Err(Vacant::Failed(error)) => return Err(error),
        };

        // A close sweep may have run while the factory was busy.
        if core.closed() {
            self.slots.remove_if(id, |_, current| Arc::ptr_eq(current, &slot));
            if let Err(error) = stored.close() {
                warn!(key = %id, %error, "teardown failed for instance created during close");
            }
            return Err(ScopeError::InactiveScope);
        }
        downcast(stored.any_value()?)
    }

    pub(crate) fn remove<S>(&self, core: &ScopeCore<S>, id: Option<&Key>) -> ScopeResult<bool> {
        core.ensure_active()?;
        // Slots with a creation still in flight stay attached.
        let Some((id, slot)) = id.and_then(|id| self.slots.remove_if(id, |_, slot| slot.get().is_some())) else {
            return Ok(false);
        };
        match slot.get() {
            Some(stored) => {
                stored.close()?;
                debug!(key = %id, scope = %core.scope_id(), "removed instance");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Closes every stored instance; one failure never stops the sweep.
    pub(crate) fn close<S>(&self, core: &ScopeCore<S>) -> Result<(), TeardownError> {
        if !core.mark_closed() {
            return Ok(());
        }
        // Collect first: destructors may call back into the store.
        let keys: Vec<Key> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        debug!(scope = %core.scope_id(), count = keys.len(), "closing scope cache");

        let mut failures = Vec::new();
        for key in keys {
            let Some((key, slot)) = self.slots.remove(&key) else {
                continue;
            };
            if let Some(stored) = slot.get() {
                if let Err(error) = stored.close() {
                    warn!(key = %key, %error, "instance teardown failed");
                    failures.push(error);
                }
            }
        }
        TeardownError::aggregate(failures)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|entry| entry.value().get().is_some()).count()
    }

    pub(crate) fn keys(&self) -> Vec<Key> {
        self.slots
            .iter()
            .filter(|entry| entry.value().get().is_some())
            .map(|entry| entry.key().clone())
            .collect()
    }
}

/// Scope cache that memoizes one [`ManagedInstance`] per identity.
///
/// # Examples
///
/// ```rust
/// use ferrous_scopes::{factory_fn, Key, MapCache, ScopeCache, ScopeId};
/// use std::sync::Arc;
///
/// let cache = MapCache::new(ScopeId::new("request"));
/// let factory = factory_fn(|_| Ok(String::from("session"))).shared();
/// let key = Key::named("session");
///
/// let first = cache.instance(Some(&key), Some(&factory), None).unwrap().unwrap();
/// let second = cache.instance(Some(&key), Some(&factory), None).unwrap().unwrap();
/// assert!(Arc::ptr_eq(&first, &second));
///
/// assert!(cache.remove(Some(&key)).unwrap());
/// assert!(!cache.remove(Some(&key)).unwrap());
/// ```
pub struct MapCache {
    core: ScopeCore<MapCache>,
    store: MapStore,
}

impl MapCache {
    pub fn new(scope_id: ScopeId) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            core: ScopeCore::new(scope_id, this.clone()),
            store: MapStore::default(),
        })
    }

    /// Number of stored instances.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identities with a stored instance.
    pub fn keys(&self) -> Vec<Key> {
        self.store.keys()
    }
}

impl ScopeCache for MapCache {
    fn core(&self) -> &ScopeCore<Self> {
        &self.core
    }

    fn id(&self) -> Id {
        Id::new(
            key_of_type::<MapCache>(),
            vec![self.core.scope_id().clone(), ScopeId::ANY],
            ScopeId::SINGLETON,
        )
    }

    fn instance<I>(
        &self,
        id: Option<&Key>,
        factory: Option<&Arc<dyn Factory<I>>>,
        request: Option<&Arc<dyn Request>>,
    ) -> ScopeResult<Option<Arc<I>>>
    where
        I: Send + Sync + 'static,
    {
        self.store.instance(&self.core, id, factory, request)
    }

    fn existing(&self, id: Option<&Key>) -> ScopeResult<Option<AnyArc>> {
        self.store.existing(&self.core, id)
    }

    fn remove(&self, id: Option<&Key>) -> ScopeResult<bool> {
        self.store.remove(&self.core, id)
    }

    fn close(&self) -> Result<(), TeardownError> {
        self.store.close(&self.core)
    }
}

/// [`MapCache`] behavior bound to the "singleton" scope.
///
/// ```rust
/// use ferrous_scopes::{ScopeCache, ScopeId, SingletonCache};
///
/// let singletons = SingletonCache::new();
/// assert_eq!(singletons.scope_id(), &ScopeId::SINGLETON);
/// assert!(singletons.id().governed_by(&ScopeId::SINGLETON));
/// ```
pub struct SingletonCache {
    core: ScopeCore<SingletonCache>,
    store: MapStore,
}

impl SingletonCache {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            core: ScopeCore::new(ScopeId::SINGLETON, this.clone()),
            store: MapStore::default(),
        })
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<Key> {
        self.store.keys()
    }
}

impl ScopeCache for SingletonCache {
    fn core(&self) -> &ScopeCore<Self> {
        &self.core
    }

    fn id(&self) -> Id {
        Id::new(key_of_type::<SingletonCache>(), vec![ScopeId::SINGLETON, ScopeId::ANY], ScopeId::SINGLETON)
    }

    fn instance<I>(
        &self,
        id: Option<&Key>,
        factory: Option<&Arc<dyn Factory<I>>>,
        request: Option<&Arc<dyn Request>>,
    ) -> ScopeResult<Option<Arc<I>>>
    where
        I: Send + Sync + 'static,
    {
        self.store.instance(&self.core, id, factory, request)
    }

    fn existing(&self, id: Option<&Key>) -> ScopeResult<Option<AnyArc>> {
        self.store.existing(&self.core, id)
    }

    fn remove(&self, id: Option<&Key>) -> ScopeResult<bool> {
        self.store.remove(&self.core, id)
    }

    fn close(&self) -> Result<(), TeardownError> {
        self.store.close(&self.core)
    }
}

impl_self_factory!(MapCache, SingletonCache);
