//! Property key interning
//!
//! Property keys are interned to fixed-width symbols so that shape and
//! transition-cache lookups compare keys in O(1). The interner is
//! process-global and thread-safe because shapes (and therefore keys)
//! cross thread boundaries.

use std::fmt;
use std::sync::{Mutex, OnceLock};
use string_interner::{DefaultBackend, DefaultSymbol, StringInterner};

/// An interned property key
///
/// Copyable, identity-comparable, and hashable in O(1). Two keys created
/// from equal strings are always equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyKey(DefaultSymbol);

impl PropertyKey {
    /// Intern a string, returning its key
    pub fn new(name: &str) -> Self {
        PropertyKey(with_interner(|i| i.get_or_intern(name)))
    }

    /// Get the key for a string if it is already interned
    pub fn get(name: &str) -> Option<Self> {
        with_interner(|i| i.get(name)).map(PropertyKey)
    }

    /// Resolve the key back to its string
    pub fn resolve(&self) -> String {
        with_interner(|i| i.resolve(self.0).map(str::to_string))
            .unwrap_or_else(|| "<unresolved>".to_string())
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resolve())
    }
}

impl fmt::Debug for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyKey({:?})", self.resolve())
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        PropertyKey::new(name)
    }
}

/// Global interner instance
static INTERNER: OnceLock<Mutex<StringInterner<DefaultBackend>>> = OnceLock::new();

fn with_interner<R>(f: impl FnOnce(&mut StringInterner<DefaultBackend>) -> R) -> R {
    let interner = INTERNER.get_or_init(|| Mutex::new(StringInterner::new()));
    let mut guard = interner.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_returns_same_key() {
        let a = PropertyKey::new("test");
        let b = PropertyKey::new("test");
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_strings_different_keys() {
        assert_ne!(PropertyKey::new("foo"), PropertyKey::new("bar"));
    }

    #[test]
    fn test_resolve() {
        let key = PropertyKey::new("hello");
        assert_eq!(key.resolve(), "hello");
    }

    #[test]
    fn test_get_without_interning() {
        PropertyKey::new("present");
        assert!(PropertyKey::get("present").is_some());
        assert!(PropertyKey::get("never_interned_key_xyz").is_none());
    }
}
