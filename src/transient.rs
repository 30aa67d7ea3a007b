//! The "no scope" cache: a fresh value per request, never stored.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ScopeConfig;
use crate::error::ScopeResult;
use crate::factory::Factory;
use crate::instance::{AnyArc, ManagedInstance};
use crate::key::key_of_type;
use crate::reaper::Reaper;
use crate::request::Request;
use crate::scope::{impl_self_factory, ScopeCache, ScopeCore};
use crate::{Id, Key, ScopeId};

/// Who becomes responsible for tearing down a transient value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReclamationPolicy {
    /// The request's registry, if it has one. Otherwise the value leaks.
    #[default]
    Registry,
    /// The request's registry, if it has one. Otherwise the [`Reaper`].
    Fallback,
}

impl ReclamationPolicy {
    /// The policy selected by [`ScopeConfig::global`].
    pub fn from_config() -> Self {
        if ScopeConfig::global().reclamation_fallback {
            ReclamationPolicy::Fallback
        } else {
            ReclamationPolicy::Registry
        }
    }
}

/// Scope cache that never memoizes.
///
/// Every [`instance`](ScopeCache::instance) call runs the factory. When the
/// factory [`destroys`](Factory::destroys) its products, the new value is
/// handed off for teardown according to the [`ReclamationPolicy`]: to the
/// request's [`Registry`](crate::Registry) when there is one, else to the
/// [`Reaper`] under [`ReclamationPolicy::Fallback`]. Otherwise the value is
/// returned undestroyed and a leak warning is logged.
///
/// # Examples
///
/// ```rust
/// use ferrous_scopes::{factory_fn, Dependents, Key, RequestContext, ScopeCache, TransientCache};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let destroyed = Arc::new(AtomicUsize::new(0));
/// let counter = destroyed.clone();
/// let factory = factory_fn(|_| Ok(vec![0u8; 16]))
///     .with_destructor(move |_, _| {
///         counter.fetch_add(1, Ordering::SeqCst);
///         Ok(())
///     })
///     .shared();
///
/// let dependents = Arc::new(Dependents::new());
/// let request = RequestContext::new().with_dependents(dependents.clone()).shared();
///
/// let cache = TransientCache::new();
/// let key = Key::named("buffer");
/// let a = cache.instance(Some(&key), Some(&factory), Some(&request)).unwrap().unwrap();
/// let b = cache.instance(Some(&key), Some(&factory), Some(&request)).unwrap().unwrap();
/// assert!(!Arc::ptr_eq(&a, &b));
///
/// dependents.close().unwrap();
/// assert_eq!(destroyed.load(Ordering::SeqCst), 2);
/// ```
pub struct TransientCache {
    core: ScopeCore<TransientCache>,
    policy: Option<ReclamationPolicy>,
    reaper: Option<Arc<Reaper>>,
}

impl TransientCache {
    /// A cache following the process-wide policy and reaper.
    pub fn new() -> Arc<Self> {
        Self::build(None, None)
    }

    /// A cache pinned to `policy`, using the process-wide reaper.
    pub fn with_policy(policy: ReclamationPolicy) -> Arc<Self> {
        Self::build(Some(policy), None)
    }

    /// A cache pinned to `policy` that hands fallback values to `reaper`.
    pub fn with_reaper(policy: ReclamationPolicy, reaper: Arc<Reaper>) -> Arc<Self> {
        Self::build(Some(policy), Some(reaper))
    }

    fn build(policy: Option<ReclamationPolicy>, reaper: Option<Arc<Reaper>>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            core: ScopeCore::new(ScopeId::NONE, this.clone()),
            policy,
            reaper,
        })
    }

    pub fn policy(&self) -> ReclamationPolicy {
        self.policy.unwrap_or_else(ReclamationPolicy::from_config)
    }

    fn reaper(&self) -> Option<Arc<Reaper>> {
        self.reaper.clone().or_else(Reaper::global)
    }

    fn dispose_later<I>(
        &self,
        key: Option<&Key>,
        value: &Arc<I>,
        factory: &Arc<dyn Factory<I>>,
        request: Option<&Arc<dyn Request>>,
    ) where
        I: Send + Sync + 'static,
    {
        let key = key.map(Key::display_name).unwrap_or("<unnamed>");

        if let Some(registry) = request.and_then(|r| r.registry()) {
            let instance = ManagedInstance::from_factory(Some(Arc::clone(value)), factory, request.cloned());
            registry.register(Arc::new(instance));
            debug!(key, "transient instance registered for teardown");
            return;
        }

        if self.policy() == ReclamationPolicy::Fallback {
            let Some(reaper) = self.reaper() else {
                warn!(key, "no reaper available; transient instance will not be destroyed");
                return;
            };
            // No request context on this path: the request may still be live.
            let factory = Arc::clone(factory);
            let watched = reaper.watch(value, move |value| factory.destroy(&value, None));
            match watched {
                Some(_) => debug!(key, "transient instance handed to the reaper"),
                None => warn!(key, "reaper stopped; transient instance will not be destroyed"),
            }
            return;
        }

        warn!(key, "no registry for transient instance; it will not be destroyed");
    }
}

impl ScopeCache for TransientCache {
    fn core(&self) -> &ScopeCore<Self> {
        &self.core
    }

    fn id(&self) -> Id {
        Id::new(key_of_type::<TransientCache>(), vec![ScopeId::NONE, ScopeId::ANY], ScopeId::SINGLETON)
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
        self.core.ensure_active()?;
        let Some(factory) = factory else {
            return Ok(None);
        };
        let Some(value) = factory
            .create(request.map(|r| &**r))
            .map_err(crate::ScopeError::Creation)?
        else {
            return Ok(None);
        };
        if factory.destroys() {
            self.dispose_later(id, &value, factory, request);
        }
        Ok(Some(value))
    }

    fn existing(&self, _id: Option<&Key>) -> ScopeResult<Option<AnyArc>> {
        self.core.ensure_active()?;
        Ok(None)
    }
}

impl_self_factory!(TransientCache);
