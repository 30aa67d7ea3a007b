//! Identity keys for values cached within a scope.

use std::any::TypeId;
use std::borrow::Cow;
use std::fmt;

/// Key identifying *what* is cached within a scope.
///
/// Keys are opaque to the caches: they are only hashed and compared. The
/// bean-resolution layer decides which key a request maps to.
///
/// # Key Types
///
/// - **Type**: Concrete types (structs, enums, primitives)
/// - **Name**: A free-form name, for identities that are not type-derived
///
/// # Examples
///
/// ```rust
/// use ferrous_scopes::{Key, key_of_type};
///
/// let by_type = key_of_type::<String>();
/// let by_name = Key::named("A");
///
/// assert_eq!(by_type, key_of_type::<String>());
/// assert_ne!(by_name, Key::named("B"));
/// assert_eq!(by_name.to_string(), "A");
/// ```
#[derive(Debug, Clone)]
pub enum Key {
    /// Concrete type key with TypeId and name for diagnostics
    Type(TypeId, &'static str),
    /// Free-form name key
    Name(Cow<'static, str>),
}

impl Key {
    /// Creates a [`Key::Name`] key.
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Key::Name(name.into())
    }

    /// Get the type name or key name for display
    ///
    /// ```rust
    /// use ferrous_scopes::Key;
    /// use std::any::TypeId;
    ///
    /// let type_key = Key::Type(TypeId::of::<String>(), "alloc::string::String");
    /// assert_eq!(type_key.display_name(), "alloc::string::String");
    /// assert_eq!(Key::named("port").display_name(), "port");
    /// ```
    pub fn display_name(&self) -> &str {
        match self {
            Key::Type(_, name) => name,
            Key::Name(name) => name,
        }
    }
}

// TypeId-only comparison for concrete types; the name is diagnostics only
impl PartialEq for Key {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Key::Type(a, _), Key::Type(b, _)) => a == b,
            (Key::Name(a), Key::Name(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Key {}

impl std::hash::Hash for Key {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Key::Type(id, _) => {
                0u8.hash(state); // Discriminant
                id.hash(state);
            }
            Key::Name(name) => {
                1u8.hash(state);
                name.hash(state);
            }
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl From<&'static str> for Key {
    fn from(name: &'static str) -> Self {
        Key::named(name)
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::named(name)
    }
}

/// Creates the [`Key::Type`] key for `T`.
#[inline(always)]
pub fn key_of_type<T: 'static>() -> Key {
    Key::Type(TypeId::of::<T>(), std::any::type_name::<T>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn type_keys_ignore_diagnostic_name() {
        let a = Key::Type(TypeId::of::<u8>(), "u8");
        let b = Key::Type(TypeId::of::<u8>(), "renamed");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn owned_and_static_names_are_equal() {
        assert_eq!(Key::named("A"), Key::from(String::from("A")));
        assert_ne!(Key::named("u8"), key_of_type::<u8>());
    }

    #[test]
    fn display_uses_type_or_name() {
        assert_eq!(key_of_type::<u32>().to_string(), "u32");
        assert_eq!(Key::named("port").to_string(), "port");
    }
}
