//! # ferrous-scopes
//!
//! Scope caches and instance lifecycle for a dependency-injection runtime.
//!
//! A scope cache decides how long a contextual value lives and when it gets
//! torn down. Factories decide how values are built and destroyed.
//!
//! ## Features
//!
//! - **Single-flight memoization**: concurrent first requests for one
//!   identity run the factory once and all observe the same value
//! - **Exactly-once teardown**: every managed value is destroyed at most
//!   once, with destructor and release failures aggregated
//! - **Best-effort sweeps**: closing a cache attempts every stored value
//!   even when some teardowns fail
//! - **Self-describing caches**: each cache is its own factory and can be
//!   registered with a container like any other contextual object
//! - **Opt-in reclamation**: transient values without a registry can be
//!   handed to a background [`Reaper`]
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrous_scopes::{factory_fn, Key, MapCache, ScopeCache, ScopeId};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! struct Session {
//!     user: String,
//! }
//!
//! let destroyed = Arc::new(AtomicUsize::new(0));
//! let counter = destroyed.clone();
//! let factory = factory_fn(|_request| Ok(Session { user: "ada".into() }))
//!     .with_destructor(move |_session, _request| {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!         Ok(())
//!     })
//!     .shared();
//!
//! let cache = MapCache::new(ScopeId::new("request"));
//! let key = Key::named("session");
//! let session = cache.instance(Some(&key), Some(&factory), None).unwrap().unwrap();
//! assert_eq!(session.user, "ada");
//!
//! cache.close().unwrap();
//! assert_eq!(destroyed.load(Ordering::SeqCst), 1);
//! assert!(!cache.active());
//! ```
//!
//! ## Scopes
//!
//! - [`SingletonCache`]: one value per identity for the container's lifetime
//! - [`MapCache`]: one value per identity for a named scope
//! - [`TransientCache`]: a fresh value on every request, never stored
//!
//! ## Transient teardown
//!
//! Transient values are disowned as soon as they are returned. When their
//! factory destroys its products, the value is registered with the
//! request's [`Registry`] (for example a [`Dependents`] list) and destroyed
//! when that registry closes:
//!
//! ```rust
//! use ferrous_scopes::{factory_fn, Dependents, RequestContext, ScopeCache, TransientCache};
//! use std::sync::Arc;
//!
//! let factory = factory_fn(|_| Ok(String::from("scratch")))
//!     .with_destructor(|_, _| Ok(()))
//!     .shared();
//! let dependents = Arc::new(Dependents::new());
//! let request = RequestContext::new().with_dependents(dependents.clone()).shared();
//!
//! let cache = TransientCache::new();
//! cache.instance(None, Some(&factory), Some(&request)).unwrap();
//! assert_eq!(dependents.len(), 1);
//! dependents.close().unwrap();
//! ```
//!
//! Without a registry, the value either leaks (logged as a warning) or,
//! with [`ReclamationPolicy::Fallback`], is handed to the [`Reaper`]. The
//! reaper is not a reliability mechanism; see its documentation.

pub mod config;
pub mod error;
pub mod factory;
pub mod id;
pub mod instance;
pub mod key;
pub mod map_cache;
pub mod reaper;
pub mod request;
pub mod scope;
pub mod transient;

pub use config::ScopeConfig;
pub use error::{BoxError, ReleaseError, ScopeError, ScopeResult, TeardownCause, TeardownError};
pub use factory::{factory_fn, Bean, Creation, Factory, FnFactory};
pub use id::{Id, ScopeId};
pub use instance::{AnyArc, Destructor, ManagedInstance, Releaser, Teardown};
pub use key::{key_of_type, Key};
pub use map_cache::{MapCache, SingletonCache};
pub use reaper::{ReclaimedHandle, Reaper};
pub use request::{Dependents, Registry, Request, RequestContext};
pub use scope::{ScopeCache, ScopeCore};
pub use transient::{ReclamationPolicy, TransientCache};
