//! Transition cache
//!
//! The transition cache deduplicates shape transitions: equal layout
//! histories starting from the same shape converge on the identical
//! child shape instance, which is what makes identity-based shape checks
//! at access sites sound. Entries are weakly held; a reclaimed entry is
//! regenerated deterministically on the next lookup.

use crate::intern::PropertyKey;
use crate::location::LocationSpec;
use crate::shape::Shape;
use crate::value::Value;
use rustc_hash::FxHashMap as HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::trace;

/// One layout-changing operation and its operands.
///
/// Together with the parent shape's identity this keys the transition
/// cache. Specs rather than concrete locations appear here: the slot
/// index a transition assigns is a deterministic function of the parent
/// shape, so it does not discriminate transitions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TransitionKey {
    /// Append a property
    Add {
        key: PropertyKey,
        spec: LocationSpec,
        flags: u8,
    },
    /// Append a shape-held constant property. The value is part of the
    /// key: shapes with different constants for a key never unify.
    AddConstant {
        key: PropertyKey,
        value: Value,
        flags: u8,
    },
    /// Remove a property
    Remove { key: PropertyKey },
    /// Generalize one property's location and/or change its flags
    Replace {
        key: PropertyKey,
        spec: LocationSpec,
        flags: u8,
    },
    /// Change the shape's 8-bit flag payload
    ShapeFlags { flags: u8 },
    /// Change the dynamic type tag (identity of the tag)
    DynamicType { type_id: u64 },
    /// Switch to the shared (no-slot-reuse) variant
    Share,
}

/// Dead weak entries are swept once this many insertions accumulate
const PRUNE_INTERVAL: u64 = 64;

/// Counters for cache behavior, useful in logs and benchmarks
#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    races: AtomicU64,
    inserts: AtomicU64,
}

/// Snapshot of [`TransitionCache`] counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found a live cached child
    pub hits: u64,
    /// Lookups that found nothing (or a reclaimed entry)
    pub misses: u64,
    /// Insertions that lost to a concurrent builder
    pub races: u64,
    /// Entries currently in the cache; dead weak entries are swept every
    /// batch of insertions, so this tracks the live count closely
    pub entries: usize,
}

/// Weak, concurrent map from (parent shape, transition) to child shape.
///
/// One cache serves a whole root lineage; independent runtime instances
/// wanting isolation supply their own instance via the shape builder.
/// Insertion is insert-if-absent: when two threads build the same child
/// concurrently, the loser's shape is discarded and both observe the
/// winner.
pub struct TransitionCache {
    entries: Mutex<HashMap<(u64, TransitionKey), Weak<Shape>>>,
    counters: Counters,
}

impl TransitionCache {
    /// Create an empty cache
    pub fn new() -> Arc<Self> {
        Arc::new(TransitionCache {
            entries: Mutex::new(HashMap::default()),
            counters: Counters::default(),
        })
    }

    /// Look up a live child for `(parent, key)` that satisfies `check`.
    ///
    /// A dead weak entry counts as a miss; regeneration is the caller's
    /// job and must be deterministic.
    pub(crate) fn lookup(
        &self,
        parent_id: u64,
        key: &TransitionKey,
        check: &dyn Fn(&Arc<Shape>) -> bool,
    ) -> Option<Arc<Shape>> {
        let guard = self.lock();
        let child = guard
            .get(&(parent_id, key.clone()))
            .and_then(Weak::upgrade)
            .filter(|c| check(c));
        drop(guard);

        match child {
            Some(child) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                trace!(parent_id, ?key, child_id = child.id(), "transition cache hit");
                Some(child)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert `built` unless a live, acceptable child raced in first;
    /// returns the canonical child either way.
    pub(crate) fn insert_if_absent(
        &self,
        parent_id: u64,
        key: TransitionKey,
        built: Arc<Shape>,
        check: &dyn Fn(&Arc<Shape>) -> bool,
    ) -> Arc<Shape> {
        let mut guard = self.lock();
        match guard.get(&(parent_id, key.clone())).and_then(Weak::upgrade) {
            Some(existing) if check(&existing) => {
                drop(guard);
                self.counters.races.fetch_add(1, Ordering::Relaxed);
                trace!(
                    parent_id,
                    ?key,
                    winner_id = existing.id(),
                    loser_id = built.id(),
                    "transition race, discarding local shape"
                );
                existing
            }
            _ => {
                guard.insert((parent_id, key), Arc::downgrade(&built));
                let inserts = self.counters.inserts.fetch_add(1, Ordering::Relaxed) + 1;
                if inserts % PRUNE_INTERVAL == 0 {
                    // Opportunistic sweep so transient shapes do not leave
                    // an ever-growing trail of dead entries
                    guard.retain(|_, weak| weak.strong_count() > 0);
                }
                drop(guard);
                built
            }
        }
    }

    /// Drop entries whose shapes have been reclaimed.
    ///
    /// Insertions already sweep the cache periodically; call this to
    /// release memory eagerly, e.g. after discarding a whole lineage.
    pub fn prune(&self) {
        self.lock().retain(|_, weak| weak.strong_count() > 0);
    }

    /// Counter snapshot plus the current entry count
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            races: self.counters.races.load(Ordering::Relaxed),
            entries: self.lock().len(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(u64, TransitionKey), Weak<Shape>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
