//! Invalidatable assumptions
//!
//! An assumption is a one-shot token a speculative compiler can check
//! cheaply: it starts valid and can be invalidated exactly once, after
//! which it never reports valid again. Shapes attach assumptions for
//! validity, leaf-ness, and per-property stability.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A monotone, one-shot invalidatable token.
///
/// Cloning an assumption shares the underlying flag: invalidating any
/// clone invalidates all of them. Checking is a single relaxed-acquire
/// atomic load; no lock is ever taken.
#[derive(Clone)]
pub struct Assumption {
    valid: Arc<AtomicBool>,
}

impl Assumption {
    /// Create a new, valid assumption
    pub fn valid() -> Self {
        Assumption {
            valid: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Create an assumption that was never valid
    ///
    /// Used as the sentinel result for capabilities that are disabled,
    /// e.g. property assumptions on shapes built without them.
    pub fn never_valid() -> Self {
        Assumption {
            valid: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check whether the assumption still holds
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Invalidate the assumption. Idempotent; once invalid, forever invalid.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

impl fmt::Debug for Assumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Assumption(valid={})", self.is_valid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_valid() {
        assert!(Assumption::valid().is_valid());
    }

    #[test]
    fn test_never_valid() {
        assert!(!Assumption::never_valid().is_valid());
    }

    #[test]
    fn test_invalidate_is_monotone() {
        let a = Assumption::valid();
        a.invalidate();
        assert!(!a.is_valid());
        // Invalidating again must not resurrect it
        a.invalidate();
        assert!(!a.is_valid());
    }

    #[test]
    fn test_clones_share_state() {
        let a = Assumption::valid();
        let b = a.clone();
        a.invalidate();
        assert!(!b.is_valid());
    }

    #[test]
    fn test_cross_thread_visibility() {
        let a = Assumption::valid();
        let b = a.clone();
        let handle = std::thread::spawn(move || {
            b.invalidate();
        });
        handle.join().unwrap();
        assert!(!a.is_valid());
    }
}
