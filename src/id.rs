//! Scope identities and identity descriptors.

use std::borrow::Cow;
use std::fmt;

use crate::Key;

/// Opaque token naming a scope, e.g. "singleton" or "none".
///
/// ```rust
/// use ferrous_scopes::ScopeId;
///
/// assert_eq!(ScopeId::SINGLETON.name(), "singleton");
/// assert_eq!(ScopeId::new("request"), ScopeId::new(String::from("request")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(Cow<'static, str>);

impl ScopeId {
    /// The scope whose instances live as long as the container.
    pub const SINGLETON: ScopeId = ScopeId(Cow::Borrowed("singleton"));
    /// The scope that never shares instances.
    pub const NONE: ScopeId = ScopeId(Cow::Borrowed("none"));
    /// Qualifier matched by every lookup.
    pub const ANY: ScopeId = ScopeId(Cow::Borrowed("any"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        ScopeId(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity descriptor of a contextual object: its key, qualifiers, and
/// the scope that governs its lifetime.
///
/// Scope caches describe themselves with an `Id` so the container can
/// register and retrieve them like any other contextual object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Id {
    key: Key,
    qualifiers: Vec<ScopeId>,
    governing_scope: ScopeId,
}

impl Id {
    pub fn new(key: Key, qualifiers: Vec<ScopeId>, governing_scope: ScopeId) -> Self {
        Self { key, qualifiers, governing_scope }
    }

    /// An unqualified identity governed by the "none" scope.
    pub fn of(key: impl Into<Key>) -> Self {
        Self::new(key.into(), Vec::new(), ScopeId::NONE)
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn qualifiers(&self) -> &[ScopeId] {
        &self.qualifiers
    }

    pub fn governing_scope(&self) -> &ScopeId {
        &self.governing_scope
    }

    pub fn governed_by(&self, scope: &ScopeId) -> bool {
        &self.governing_scope == scope
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.key, self.governing_scope)
    }
}
