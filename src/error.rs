//! Error types for scope caches and instance teardown.

use std::fmt;

/// Boxed error produced by user code (factories, destructors, releasers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Scope cache errors
///
/// Represents the conditions a caller of a scope cache can observe. Lookups
/// never surface destruction failures; those only appear from `remove` and
/// `close` as [`ScopeError::Teardown`].
///
/// # Examples
///
/// ```rust
/// use ferrous_scopes::ScopeError;
///
/// let inactive = ScopeError::InactiveScope;
/// assert_eq!(inactive.to_string(), "Scope is not active");
///
/// let mismatch = ScopeError::TypeMismatch("alloc::string::String");
/// assert_eq!(mismatch.to_string(), "Type mismatch for: alloc::string::String");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    /// An operation that needs an active scope ran on a closed one
    #[error("Scope is not active")]
    InactiveScope,
    /// A managed instance was read after it was closed
    #[error("Instance already closed")]
    AlreadyClosed,
    /// A stored value is not of the requested type
    #[error("Type mismatch for: {0}")]
    TypeMismatch(&'static str),
    /// The factory failed to produce a value
    #[error("Factory failed: {0}")]
    Creation(#[source] BoxError),
    /// Destructor and/or releaser logic failed
    #[error(transparent)]
    Teardown(#[from] TeardownError),
}

impl ScopeError {
    /// Returns true for [`ScopeError::InactiveScope`].
    pub fn is_inactive(&self) -> bool {
        matches!(self, ScopeError::InactiveScope)
    }
}

/// Result type for scope cache operations
pub type ScopeResult<T> = Result<T, ScopeError>;

/// Failure reported by a releaser.
///
/// `Interrupted` is the cancellation-like condition: teardown translates it
/// into [`TeardownCause::Interrupted`] instead of passing it through raw.
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("interrupted: {0}")]
    Interrupted(String),
    #[error("{0}")]
    Failed(#[source] BoxError),
}

/// One failure observed while tearing an instance down.
#[derive(Debug, thiserror::Error)]
pub enum TeardownCause {
    /// The destructor returned an error
    #[error("Destructor failed: {0}")]
    Destructor(#[source] BoxError),
    /// The releaser returned an error
    #[error("Release failed: {0}")]
    Release(#[source] BoxError),
    /// Release was interrupted
    #[error("Release interrupted: {0}")]
    Interrupted(String),
    /// Teardown of another instance failed during the same sweep
    #[error(transparent)]
    Nested(Box<TeardownError>),
}

/// Aggregated teardown failure: a primary cause plus suppressed ones.
///
/// Teardown never stops at the first failure. Every step runs, and every
/// failure ends up either as the primary cause or in [`suppressed`] in the
/// order it was observed.
///
/// [`suppressed`]: TeardownError::suppressed
#[derive(Debug)]
pub struct TeardownError {
    primary: TeardownCause,
    suppressed: Vec<TeardownCause>,
}

impl TeardownError {
    pub fn new(primary: TeardownCause) -> Self {
        Self { primary, suppressed: Vec::new() }
    }

    pub fn primary(&self) -> &TeardownCause {
        &self.primary
    }

    pub fn suppressed(&self) -> &[TeardownCause] {
        &self.suppressed
    }

    /// Attaches a secondary failure.
    pub fn suppress(&mut self, cause: TeardownCause) {
        self.suppressed.push(cause);
    }

    /// Total number of causes, primary included.
    pub fn len(&self) -> usize {
        1 + self.suppressed.len()
    }

    /// Always false; a teardown error carries at least its primary cause.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Folds independent failures into one error.
    ///
    /// The first failure becomes the primary; every later one is attached
    /// whole as a [`TeardownCause::Nested`] suppressed cause.
    pub fn aggregate<E>(failures: E) -> Result<(), TeardownError>
    where
        E: IntoIterator<Item = TeardownError>,
    {
        let mut failures = failures.into_iter();
        let Some(mut first) = failures.next() else {
            return Ok(());
        };
        for failure in failures {
            first.suppress(TeardownCause::Nested(Box::new(failure)));
        }
        Err(first)
    }
}

impl From<TeardownCause> for TeardownError {
    fn from(cause: TeardownCause) -> Self {
        Self::new(cause)
    }
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Teardown failed: {}", self.primary)?;
        if !self.suppressed.is_empty() {
            write!(f, " ({} suppressed)", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.primary)
    }
}
