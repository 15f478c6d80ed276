//! Cached object access
//!
//! Access sites are the per-call-site inline caches of the access
//! protocol. A site remembers, per shape identity, where its key lives,
//! so the steady-state path is one shape-id comparison and one slot
//! access. A site that sees more than [`SITE_MAX_SHAPES`] distinct shapes
//! goes megamorphic and stops caching; the generic path still works.

use crate::intern::PropertyKey;
use crate::location::Location;
use crate::object::DynamicObject;
use crate::value::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::trace;

/// Distinct shapes a site caches before going megamorphic
pub const SITE_MAX_SHAPES: usize = 4;

/// Counter snapshot of one access site
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteStats {
    /// Accesses served from a cached entry
    pub hits: u64,
    /// Accesses that took the generic path
    pub misses: u64,
    /// Whether the site stopped caching
    pub megamorphic: bool,
}

/// One cached (shape, location) pairing. `location` is `None` when the
/// shape is known not to have the key, so absence is cached too.
struct SiteEntry {
    shape_id: u64,
    location: Option<Location>,
}

struct SiteCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SiteCounters {
    fn new() -> Self {
        SiteCounters {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

/// A polymorphic inline cache for reads of one property key
pub struct ReadSite {
    key: PropertyKey,
    entries: Mutex<Vec<SiteEntry>>,
    megamorphic: AtomicBool,
    counters: SiteCounters,
}

impl ReadSite {
    /// Create an empty site for `key`
    pub fn new(key: impl Into<PropertyKey>) -> Self {
        ReadSite {
            key: key.into(),
            entries: Mutex::new(Vec::new()),
            megamorphic: AtomicBool::new(false),
            counters: SiteCounters::new(),
        }
    }

    /// The key this site reads
    pub fn key(&self) -> PropertyKey {
        self.key
    }

    /// Read the property from `object`, via the cache when possible
    pub fn get(&self, object: &DynamicObject) -> Option<Value> {
        if !self.megamorphic.load(Ordering::Acquire) {
            let shape = object.shape();
            let cached = {
                let entries = lock(&self.entries);
                entries
                    .iter()
                    .find(|e| e.shape_id == shape.id())
                    .map(|e| e.location.clone())
            };
            match cached {
                Some(None) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Some(Some(location)) => {
                    // The object may have migrated since we sampled the
                    // shape; a guarded read catches that
                    if let Some(value) = object.read_if_shape(shape.id(), &location) {
                        self.counters.hits.fetch_add(1, Ordering::Relaxed);
                        return Some(value);
                    }
                }
                None => {
                    self.record(shape.id(), shape.get_property(self.key).map(|p| p.location().clone()));
                }
            }
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        object.get(self.key)
    }

    /// Whether the site stopped caching
    pub fn is_megamorphic(&self) -> bool {
        self.megamorphic.load(Ordering::Acquire)
    }

    /// Counter snapshot
    pub fn stats(&self) -> SiteStats {
        SiteStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            megamorphic: self.is_megamorphic(),
        }
    }

    fn record(&self, shape_id: u64, location: Option<Location>) {
        let mut entries = lock(&self.entries);
        if entries.iter().any(|e| e.shape_id == shape_id) {
            return;
        }
        if entries.len() >= SITE_MAX_SHAPES {
            trace!(key = %self.key, "read site went megamorphic");
            entries.clear();
            self.megamorphic.store(true, Ordering::Release);
            return;
        }
        entries.push(SiteEntry { shape_id, location });
    }
}

/// A polymorphic inline cache for writes of one property key.
///
/// Only in-place writes (no shape change) are cached; writes that add or
/// migrate the property take the generic path and seed the cache with the
/// post-transition shape, which the next write then hits.
pub struct WriteSite {
    key: PropertyKey,
    entries: Mutex<Vec<SiteEntry>>,
    megamorphic: AtomicBool,
    counters: SiteCounters,
}

impl WriteSite {
    /// Create an empty site for `key`
    pub fn new(key: impl Into<PropertyKey>) -> Self {
        WriteSite {
            key: key.into(),
            entries: Mutex::new(Vec::new()),
            megamorphic: AtomicBool::new(false),
            counters: SiteCounters::new(),
        }
    }

    /// The key this site writes
    pub fn key(&self) -> PropertyKey {
        self.key
    }

    /// Write the property on `object`, via the cache when possible
    pub fn put(&self, object: &DynamicObject, value: Value) -> crate::error::Result<()> {
        if !self.megamorphic.load(Ordering::Acquire) {
            let shape = object.shape();
            let cached = {
                let entries = lock(&self.entries);
                entries
                    .iter()
                    .find(|e| e.shape_id == shape.id())
                    .and_then(|e| e.location.clone())
            };
            if let Some(location) = cached {
                if let Some(result) = object.write_if_shape(shape.id(), &location, value.clone()) {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return result;
                }
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        object.put(self.key, value)?;
        if !self.megamorphic.load(Ordering::Acquire) {
            // Cache the post-transition shape; a stable write sequence
            // hits from the second write on
            let shape = object.shape();
            let location = shape
                .get_property(self.key)
                .map(|p| p.location())
                .filter(|l| l.has_slot())
                .cloned();
            if let Some(location) = location {
                self.record(shape.id(), location);
            }
        }
        Ok(())
    }

    /// Whether the site stopped caching
    pub fn is_megamorphic(&self) -> bool {
        self.megamorphic.load(Ordering::Acquire)
    }

    /// Counter snapshot
    pub fn stats(&self) -> SiteStats {
        SiteStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            megamorphic: self.is_megamorphic(),
        }
    }

    fn record(&self, shape_id: u64, location: Location) {
        let mut entries = lock(&self.entries);
        if entries.iter().any(|e| e.shape_id == shape_id) {
            return;
        }
        if entries.len() >= SITE_MAX_SHAPES {
            trace!(key = %self.key, "write site went megamorphic");
            entries.clear();
            self.megamorphic.store(true, Ordering::Release);
            return;
        }
        entries.push(SiteEntry {
            shape_id,
            location: Some(location),
        });
    }
}

fn lock(entries: &Mutex<Vec<SiteEntry>>) -> MutexGuard<'_, Vec<SiteEntry>> {
    entries.lock().unwrap_or_else(|e| e.into_inner())
}
