//! Factories and the identity/factory pairings handed to scope caches.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::BoxError;
use crate::instance::Destructor;
use crate::request::Request;
use crate::Id;

/// Pluggable creator and destroyer of contextual instances.
///
/// Scope caches decide *when* to call a factory; the factory decides *what*
/// gets built and how it is torn down. `create` may legitimately produce no
/// value (`Ok(None)`).
///
/// # Examples
///
/// ```rust
/// use ferrous_scopes::{Factory, Request, BoxError};
/// use std::sync::Arc;
///
/// struct Connection(String);
///
/// struct ConnectionFactory;
///
/// impl Factory<Connection> for ConnectionFactory {
///     fn create(&self, _request: Option<&dyn Request>) -> Result<Option<Arc<Connection>>, BoxError> {
///         Ok(Some(Arc::new(Connection("db://local".into()))))
///     }
///
///     fn destroy(&self, conn: &Arc<Connection>, _request: Option<&dyn Request>) -> Result<(), BoxError> {
///         println!("closing {}", conn.0);
///         Ok(())
///     }
///
///     fn destroys(&self) -> bool {
///         true
///     }
/// }
/// ```
pub trait Factory<I>: Send + Sync {
    /// Produces a new value.
    fn create(&self, request: Option<&dyn Request>) -> Result<Option<Arc<I>>, BoxError>;

    /// Tears down a value this factory produced.
    fn destroy(&self, _instance: &Arc<I>, _request: Option<&dyn Request>) -> Result<(), BoxError> {
        Ok(())
    }

    /// Whether values produced by this factory need [`destroy`](Factory::destroy).
    fn destroys(&self) -> bool {
        false
    }
}

/// Closure-backed [`Factory`], built with [`factory_fn`].
pub struct FnFactory<I, C> {
    create: C,
    destructor: Option<Destructor<I>>,
    _marker: PhantomData<fn() -> I>,
}

/// Builds a factory from a creation closure.
///
/// ```rust
/// use ferrous_scopes::{factory_fn, Factory};
/// use std::sync::Arc;
///
/// let factory = factory_fn(|_request| Ok(42u32))
///     .with_destructor(|value, _request| {
///         assert_eq!(**value, 42);
///         Ok(())
///     });
///
/// assert!(factory.destroys());
/// let value = factory.create(None).unwrap().unwrap();
/// assert_eq!(*value, 42);
/// ```
pub fn factory_fn<I, C>(create: C) -> FnFactory<I, C>
where
    C: Fn(Option<&dyn Request>) -> Result<I, BoxError> + Send + Sync,
{
    FnFactory { create, destructor: None, _marker: PhantomData }
}

impl<I, C> FnFactory<I, C>
where
    I: Send + Sync + 'static,
    C: Fn(Option<&dyn Request>) -> Result<I, BoxError> + Send + Sync + 'static,
{
    /// Adds a destructor; the factory then reports `destroys() == true`.
    pub fn with_destructor<D>(mut self, destructor: D) -> Self
    where
        D: Fn(&Arc<I>, Option<&dyn Request>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.destructor = Some(Box::new(destructor));
        self
    }

    /// Erases the factory into the shared form scope caches accept.
    pub fn shared(self) -> Arc<dyn Factory<I>> {
        Arc::new(self)
    }
}

impl<I, C> Factory<I> for FnFactory<I, C>
where
    C: Fn(Option<&dyn Request>) -> Result<I, BoxError> + Send + Sync,
{
    fn create(&self, request: Option<&dyn Request>) -> Result<Option<Arc<I>>, BoxError> {
        (self.create)(request).map(|value| Some(Arc::new(value)))
    }

    fn destroy(&self, instance: &Arc<I>, request: Option<&dyn Request>) -> Result<(), BoxError> {
        match &self.destructor {
            Some(destructor) => destructor(instance, request),
            None => Ok(()),
        }
    }

    fn destroys(&self) -> bool {
        self.destructor.is_some()
    }
}

/// Pairing of an identity with the factory that builds it.
pub struct Bean<I> {
    pub id: Id,
    pub factory: Arc<dyn Factory<I>>,
}

impl<I> Bean<I> {
    pub fn new(id: Id, factory: Arc<dyn Factory<I>>) -> Self {
        Self { id, factory }
    }
}

impl<I> Clone for Bean<I> {
    fn clone(&self) -> Self {
        Self { id: self.id.clone(), factory: Arc::clone(&self.factory) }
    }
}

impl<I> fmt::Debug for Bean<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bean").field("id", &self.id).finish_non_exhaustive()
    }
}

/// A resolved creation: which bean to build, and the request that asked.
///
/// Scope caches accept a `Creation` wherever they accept an identity; the
/// bean supplies the key and factory and the request is passed through.
pub struct Creation<I> {
    pub bean: Bean<I>,
    pub request: Option<Arc<dyn Request>>,
}

impl<I> Creation<I> {
    pub fn new(bean: Bean<I>, request: Option<Arc<dyn Request>>) -> Self {
        Self { bean, request }
    }
}

impl<I> Clone for Creation<I> {
    fn clone(&self) -> Self {
        Self { bean: self.bean.clone(), request: self.request.clone() }
    }
}
