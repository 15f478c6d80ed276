//! Shapes
//!
//! A shape is an immutable descriptor of an object's layout: its ordered
//! property list, the storage location and flags of each property, a
//! dynamic type tag, and shape-level metadata. Objects that follow the
//! same transitions from the same root share the identical shape
//! instance, so a cached access site can validate an object with a single
//! identity comparison.
//!
//! Shapes never mutate; every "mutating" operation returns a different
//! (possibly cached) shape. The per-lineage [`TransitionCache`] is what
//! makes independently built but equal histories converge.

mod merge;
mod transition;

pub use transition::{CacheStats, TransitionCache, TransitionKey};

use crate::allocator::{AllocationState, Allocator};
use crate::assumption::Assumption;
use crate::error::{Error, Result};
use crate::intern::PropertyKey;
use crate::layout::Layout;
use crate::location::{Location, LocationSpec};
use crate::property::Property;
use crate::value::{RefValue, Value};
use bitflags::bitflags;
use rustc_hash::FxHashMap as HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

bitflags! {
    /// Internal shape capability bits, packed next to the 8-bit user flags
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct ShapeBits: u8 {
        /// No-slot-reuse policy for safe cross-thread object sharing
        const SHARED = 1 << 0;
        /// Per-property stability assumptions are handed out
        const PROPERTY_ASSUMPTIONS = 1 << 1;
    }
}

/// A dynamic type tag with identity semantics.
///
/// The engine never inspects the tag; it only compares identities and
/// keys type-change transitions by them.
#[derive(Clone)]
pub struct DynamicType(Arc<str>);

impl DynamicType {
    /// Create a fresh tag. Two tags created from the same name are still
    /// distinct; clone a tag to share its identity.
    pub fn new(name: impl AsRef<str>) -> Self {
        DynamicType(Arc::from(name.as_ref()))
    }

    /// The tag's display name
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Identity comparison
    #[inline]
    pub fn ptr_eq(&self, other: &DynamicType) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn id(&self) -> u64 {
        Arc::as_ptr(&self.0) as *const u8 as usize as u64
    }
}

impl PartialEq for DynamicType {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for DynamicType {}

impl fmt::Debug for DynamicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DynamicType({:?})", self.name())
    }
}

/// Ordered key -> property mapping with O(1) lookup.
/// Insertion order is preserved; keys are unique.
#[derive(Clone, Default)]
struct PropertyMap {
    entries: Vec<Property>,
    index: HashMap<PropertyKey, u32>,
}

impl PropertyMap {
    fn get(&self, key: PropertyKey) -> Option<&Property> {
        self.index
            .get(&key)
            .map(|&i| &self.entries[i as usize])
    }

    fn contains(&self, key: PropertyKey) -> bool {
        self.index.contains_key(&key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn last(&self) -> Option<&Property> {
        self.entries.last()
    }

    fn iter(&self) -> std::slice::Iter<'_, Property> {
        self.entries.iter()
    }

    fn appended(&self, property: Property) -> PropertyMap {
        let mut next = self.clone();
        next.index
            .insert(property.key(), next.entries.len() as u32);
        next.entries.push(property);
        next
    }

    fn replaced(&self, property: Property) -> PropertyMap {
        let mut next = self.clone();
        if let Some(&i) = next.index.get(&property.key()) {
            next.entries[i as usize] = property;
        }
        next
    }

    fn removed(&self, key: PropertyKey) -> PropertyMap {
        let mut next = PropertyMap::default();
        for property in self.entries.iter().filter(|p| p.key() != key) {
            next = next.appended(property.clone());
        }
        next
    }
}

/// Shape identity counter (process-wide, also used in cache keys and logs)
static NEXT_SHAPE_ID: AtomicU64 = AtomicU64::new(1);

fn next_shape_id() -> u64 {
    NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed)
}

/// An immutable object layout descriptor
pub struct Shape {
    id: u64,
    root_id: u64,
    parent: Option<Arc<Shape>>,
    layout: Arc<Layout>,
    transitions: Arc<TransitionCache>,
    properties: PropertyMap,
    dynamic_type: DynamicType,
    flags: u8,
    bits: ShapeBits,
    shared_data: Option<RefValue>,
    allocation: AllocationState,
    valid_assumption: Assumption,
    leaf_assumption: Assumption,
    property_assumptions: Mutex<HashMap<PropertyKey, Assumption>>,
}

/// Builder for root shapes
pub struct ShapeBuilder {
    layout: Option<Arc<Layout>>,
    dynamic_type: Option<DynamicType>,
    flags: u32,
    shared: bool,
    property_assumptions: bool,
    shared_data: Option<RefValue>,
    transition_cache: Option<Arc<TransitionCache>>,
}

impl ShapeBuilder {
    /// Use a custom layout (default: [`Layout::default_layout`])
    pub fn layout(mut self, layout: Arc<Layout>) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Set the initial dynamic type tag
    pub fn dynamic_type(mut self, dynamic_type: DynamicType) -> Self {
        self.dynamic_type = Some(dynamic_type);
        self
    }

    /// Set initial shape flags; must be in 0..=255
    pub fn shape_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Build the root shape shared (no-slot-reuse policy from the start)
    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Enable per-property stability assumptions for this lineage
    pub fn property_assumptions(mut self, enable: bool) -> Self {
        self.property_assumptions = enable;
        self
    }

    /// Attach opaque shared data inherited by all derived shapes
    pub fn shared_data(mut self, data: RefValue) -> Self {
        self.shared_data = Some(data);
        self
    }

    /// Supply a transition cache instance, e.g. to share one across
    /// several roots or to isolate independent runtime instances
    pub fn transition_cache(mut self, cache: Arc<TransitionCache>) -> Self {
        self.transition_cache = Some(cache);
        self
    }

    /// Build the root shape
    pub fn build(self) -> Result<Arc<Shape>> {
        if self.flags > u8::MAX as u32 {
            return Err(Error::unsupported_configuration(format!(
                "shape flags must be in the range 0..=255, got {}",
                self.flags
            )));
        }
        let mut bits = ShapeBits::empty();
        if self.shared {
            bits |= ShapeBits::SHARED;
        }
        if self.property_assumptions {
            bits |= ShapeBits::PROPERTY_ASSUMPTIONS;
        }

        let id = next_shape_id();
        let root = Arc::new(Shape {
            id,
            root_id: id,
            parent: None,
            layout: self.layout.unwrap_or_else(Layout::default_layout),
            transitions: self.transition_cache.unwrap_or_else(TransitionCache::new),
            properties: PropertyMap::default(),
            dynamic_type: self
                .dynamic_type
                .unwrap_or_else(|| DynamicType::new("object")),
            flags: self.flags as u8,
            bits,
            shared_data: self.shared_data,
            allocation: AllocationState::default(),
            valid_assumption: Assumption::valid(),
            leaf_assumption: Assumption::valid(),
            property_assumptions: Mutex::new(HashMap::default()),
        });
        debug!(id, "built root shape");
        Ok(root)
    }
}

impl Shape {
    /// Start building a root shape
    pub fn builder() -> ShapeBuilder {
        ShapeBuilder {
            layout: None,
            dynamic_type: None,
            flags: 0,
            shared: false,
            property_assumptions: false,
            shared_data: None,
            transition_cache: None,
        }
    }

    // ---- queries ------------------------------------------------------

    /// Process-unique shape identity
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The parent shape, if this is not a root
    pub fn parent(&self) -> Option<&Arc<Shape>> {
        self.parent.as_ref()
    }

    /// Whether this shape is a root (no parent)
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Whether `self` and `other` descend from the same root
    pub fn is_related(&self, other: &Shape) -> bool {
        self.root_id == other.root_id
    }

    /// The shape's layout configuration
    pub fn layout(&self) -> &Arc<Layout> {
        &self.layout
    }

    /// The transition cache serving this lineage
    pub fn transitions(&self) -> &Arc<TransitionCache> {
        &self.transitions
    }

    /// Look up a property by key
    pub fn get_property(&self, key: impl Into<PropertyKey>) -> Option<&Property> {
        self.properties.get(key.into())
    }

    /// Whether the shape has a property with the given key
    pub fn has_property(&self, key: impl Into<PropertyKey>) -> bool {
        self.properties.contains(key.into())
    }

    /// Number of properties
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Properties in insertion order
    pub fn property_list(&self) -> Vec<Property> {
        self.properties.iter().cloned().collect()
    }

    /// Property keys in insertion order
    pub fn key_list(&self) -> Vec<PropertyKey> {
        self.properties.iter().map(|p| p.key()).collect()
    }

    /// The most recently added property
    pub fn last_property(&self) -> Option<&Property> {
        self.properties.last()
    }

    /// Whether every property matches the predicate (vacuously true for
    /// an empty shape)
    pub fn all_properties_match(&self, predicate: impl Fn(&Property) -> bool) -> bool {
        self.properties.iter().all(predicate)
    }

    /// The shape's dynamic type tag
    pub fn dynamic_type(&self) -> &DynamicType {
        &self.dynamic_type
    }

    /// The 8-bit user flag payload
    #[inline]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Whether the no-slot-reuse policy is active
    #[inline]
    pub fn is_shared(&self) -> bool {
        self.bits.contains(ShapeBits::SHARED)
    }

    /// Whether property assumptions are enabled for this lineage
    pub fn property_assumptions_enabled(&self) -> bool {
        self.bits.contains(ShapeBits::PROPERTY_ASSUMPTIONS)
    }

    /// Opaque data shared by the whole lineage
    pub fn shared_data(&self) -> Option<&RefValue> {
        self.shared_data.as_ref()
    }

    /// The allocation snapshot backing this shape's slots
    pub fn allocation_state(&self) -> AllocationState {
        self.allocation
    }

    /// An allocator resuming from this shape's allocation state
    pub fn allocator(&self) -> Allocator {
        Allocator::from_state(self.allocation)
    }

    /// Assumption that this shape has not been obsoleted
    pub fn valid_assumption(&self) -> &Assumption {
        &self.valid_assumption
    }

    /// Whether this shape has not been obsoleted
    pub fn is_valid(&self) -> bool {
        self.valid_assumption.is_valid()
    }

    /// Assumption that this shape has no child transitions yet
    pub fn leaf_assumption(&self) -> &Assumption {
        &self.leaf_assumption
    }

    /// Whether this shape is transitionless
    pub fn is_leaf(&self) -> bool {
        self.leaf_assumption.is_valid()
    }

    /// A stability assumption for the given key: valid until a property
    /// with that key is added, removed, or changed in this lineage.
    ///
    /// Always returns a never-valid assumption when property assumptions
    /// were not enabled on the root; never fails.
    pub fn get_property_assumption(&self, key: impl Into<PropertyKey>) -> Assumption {
        if !self.property_assumptions_enabled() {
            return Assumption::never_valid();
        }
        let key = key.into();
        let mut table = self.lock_assumptions();
        table.entry(key).or_insert_with(Assumption::valid).clone()
    }

    // ---- transitions --------------------------------------------------

    /// Add a new property, yielding a new or cached shape.
    ///
    /// Fails with `DuplicateKey` if the key is already present; use
    /// [`Shape::define_property`] for add-or-update semantics.
    pub fn add_property(
        self: &Arc<Self>,
        key: impl Into<PropertyKey>,
        value: &Value,
        flags: u8,
    ) -> Result<Arc<Shape>> {
        let key = key.into();
        if self.properties.contains(key) {
            return Err(Error::duplicate_key(key.resolve()));
        }
        let spec = LocationSpec::for_value(value, self.layout.allows_int_to_double());
        // A cached child is reusable only if its location still fits the
        // incoming value (it may have been built for a narrower type).
        let check = |child: &Arc<Shape>| {
            child
                .get_property(key)
                .is_some_and(|p| p.location().can_store(value))
        };
        let child = self.append_transition(key, spec, flags, &check);
        self.invalidate_property_assumption(key);
        Ok(child)
    }

    /// Add a shape-held constant property. Consumes no storage slot; two
    /// shapes with different constant values for a key never unify.
    pub fn add_constant_property(
        self: &Arc<Self>,
        key: impl Into<PropertyKey>,
        value: Value,
        flags: u8,
    ) -> Result<Arc<Shape>> {
        let key = key.into();
        if self.properties.contains(key) {
            return Err(Error::duplicate_key(key.resolve()));
        }
        let child = self.append_transition(key, LocationSpec::Constant(value), flags, &|_| true);
        self.invalidate_property_assumption(key);
        Ok(child)
    }

    /// Add an untyped, declared property with a default value. No slot is
    /// consumed until the first concrete write migrates it.
    pub fn add_declared_property(
        self: &Arc<Self>,
        key: impl Into<PropertyKey>,
        default: Value,
        flags: u8,
    ) -> Result<Arc<Shape>> {
        let key = key.into();
        if self.properties.contains(key) {
            return Err(Error::duplicate_key(key.resolve()));
        }
        let child = self.append_transition(key, LocationSpec::Declared(default), flags, &|_| true);
        self.invalidate_property_assumption(key);
        Ok(child)
    }

    /// Add or change a property, yielding a new or cached shape.
    ///
    /// Returns `self` unchanged when the existing location already fits
    /// the value and the flags match. Migrates the property to a more
    /// general location when it does not. Fails with `IncompatibleValue`
    /// when the existing location is final (constants included) and the
    /// value differs.
    pub fn define_property(
        self: &Arc<Self>,
        key: impl Into<PropertyKey>,
        value: &Value,
        flags: u8,
    ) -> Result<Arc<Shape>> {
        let key = key.into();
        let Some(existing) = self.properties.get(key) else {
            return self.add_property(key, value, flags);
        };

        let location = existing.location();
        // Constants/declared defaults "store" only their held value, so
        // this also covers a declared default rewritten with itself
        if existing.flags() == flags && location.can_store(value) {
            return Ok(Arc::clone(self));
        }
        if location.is_final() && !location.can_store(value) {
            return Err(Error::incompatible_value(format!(
                "cannot redefine final property '{}' with an incompatible value",
                key
            )));
        }

        let spec = if location.can_store(value) && !location.is_declared() {
            // Flags-only change: the location itself survives
            location.spec()
        } else {
            LocationSpec::generalized_for_value(location, value, self.layout.allows_int_to_double())
        };
        let existing = existing.clone();
        Ok(self.replace_transition(&existing, spec, flags))
    }

    /// Remove a property, yielding a new or cached shape.
    ///
    /// Non-shared shapes compact the remaining layout; shared shapes
    /// retire the removed slots instead, so no later property can alias
    /// them.
    pub fn remove_property(self: &Arc<Self>, key: impl Into<PropertyKey>) -> Result<Arc<Shape>> {
        let key = key.into();
        if !self.properties.contains(key) {
            return Err(Error::no_such_property(key.resolve()));
        }

        let tkey = TransitionKey::Remove { key };
        let child = self.transition(tkey, &|_| true, || {
            if self.is_shared() {
                // Retired slots stay reserved forever
                self.derived(self.properties.removed(key), self.allocation)
            } else {
                let mut allocator = Allocator::new();
                let mut properties = PropertyMap::default();
                for property in self.properties.iter().filter(|p| p.key() != key) {
                    let location = match property.location() {
                        loc @ (Location::Constant { .. } | Location::Declared { .. }) => loc.clone(),
                        Location::Object { is_final, .. } => {
                            allocator.location_for_kind(None, *is_final, false)
                        }
                        Location::Primitive {
                            kind,
                            is_final,
                            allows_int,
                            ..
                        } => allocator.location_for_kind(Some(*kind), *is_final, *allows_int),
                    };
                    properties = properties.appended(property.relocate(location));
                }
                self.derived(properties, allocator.state())
            }
        });
        // Compaction relocates surviving properties; their stability
        // assumptions describe the old slots and must fall with them.
        for property in child.properties.iter() {
            if self
                .properties
                .get(property.key())
                .is_some_and(|p| p.location() != property.location())
            {
                self.invalidate_property_assumption(property.key());
            }
        }
        self.invalidate_property_assumption(key);
        Ok(child)
    }

    /// A copy of this shape with different user flags (cached transition)
    pub fn change_flags(self: &Arc<Self>, flags: u32) -> Result<Arc<Shape>> {
        if flags > u8::MAX as u32 {
            return Err(Error::unsupported_configuration(format!(
                "shape flags must be in the range 0..=255, got {}",
                flags
            )));
        }
        let flags = flags as u8;
        if flags == self.flags {
            return Ok(Arc::clone(self));
        }
        let tkey = TransitionKey::ShapeFlags { flags };
        Ok(self.transition(tkey, &|_| true, || {
            let mut child = self.derived(self.properties.clone(), self.allocation);
            child.flags = flags;
            child
        }))
    }

    /// A copy of this shape with a different dynamic type tag (cached
    /// transition; identity of the tag keys the cache)
    pub fn change_type(self: &Arc<Self>, dynamic_type: DynamicType) -> Arc<Shape> {
        if self.dynamic_type.ptr_eq(&dynamic_type) {
            return Arc::clone(self);
        }
        let tkey = TransitionKey::DynamicType {
            type_id: dynamic_type.id(),
        };
        self.transition(tkey, &|_| true, || {
            let mut child = self.derived(self.properties.clone(), self.allocation);
            child.dynamic_type = dynamic_type.clone();
            child
        })
    }

    /// The shared variant of this shape. Idempotent; from this shape on,
    /// storage slots of removed or migrated properties are never reissued.
    pub fn make_shared_shape(self: &Arc<Self>) -> Arc<Shape> {
        if self.is_shared() {
            return Arc::clone(self);
        }
        self.transition(TransitionKey::Share, &|_| true, || {
            let mut child = self.derived(self.properties.clone(), self.allocation);
            child.bits |= ShapeBits::SHARED;
            child
        })
    }

    // ---- internals ----------------------------------------------------

    /// Append a property through the transition cache
    pub(crate) fn append_transition(
        self: &Arc<Self>,
        key: PropertyKey,
        spec: LocationSpec,
        flags: u8,
        check: &dyn Fn(&Arc<Shape>) -> bool,
    ) -> Arc<Shape> {
        let tkey = match &spec {
            LocationSpec::Constant(value) => TransitionKey::AddConstant {
                key,
                value: value.clone(),
                flags,
            },
            _ => TransitionKey::Add {
                key,
                spec: spec.clone(),
                flags,
            },
        };
        self.transition(tkey, check, || {
            let mut allocator = self.allocator().copy();
            let location = allocator.location_for_spec(&spec);
            self.derived(
                self.properties
                    .appended(Property::new(key, location, flags)),
                allocator.state(),
            )
        })
    }

    /// Replace one property's location/flags through the transition
    /// cache. Obsoletes `self`.
    fn replace_transition(
        self: &Arc<Self>,
        old: &Property,
        spec: LocationSpec,
        flags: u8,
    ) -> Arc<Shape> {
        let key = old.key();
        let tkey = TransitionKey::Replace {
            key,
            spec: spec.clone(),
            flags,
        };
        let child = self.transition(tkey, &|_| true, || {
            // Reuse the slot when the width permits; otherwise append a
            // fresh slot and retire the old one, leaving every sibling
            // location untouched.
            let (location, allocation) = match (old.location(), &spec) {
                (
                    Location::Primitive { slot, .. },
                    LocationSpec::Primitive {
                        kind,
                        is_final,
                        allows_int,
                    },
                ) => (
                    Location::Primitive {
                        slot: *slot,
                        kind: *kind,
                        is_final: *is_final,
                        allows_int: *allows_int,
                    },
                    self.allocation,
                ),
                (Location::Object { slot, .. }, LocationSpec::Object { is_final }) => (
                    Location::Object {
                        slot: *slot,
                        is_final: *is_final,
                    },
                    self.allocation,
                ),
                (_, LocationSpec::Constant(value)) => (
                    Location::Constant {
                        value: value.clone(),
                    },
                    self.allocation,
                ),
                (_, LocationSpec::Declared(default)) => (
                    Location::Declared {
                        default: default.clone(),
                    },
                    self.allocation,
                ),
                (_, spec) => {
                    let mut allocator = self.allocator().copy();
                    (allocator.location_for_spec(spec), allocator.state())
                }
            };
            self.derived(
                self.properties
                    .replaced(Property::new(key, location, flags)),
                allocation,
            )
        });
        // The migrated-away shape is obsolete for this lineage
        self.valid_assumption.invalidate();
        self.invalidate_property_assumption(key);
        child
    }

    /// Run one transition through the cache: lookup, build on miss,
    /// insert-if-absent, converge on the winner.
    fn transition(
        self: &Arc<Self>,
        tkey: TransitionKey,
        check: &dyn Fn(&Arc<Shape>) -> bool,
        build: impl FnOnce() -> Shape,
    ) -> Arc<Shape> {
        let child = match self.transitions.lookup(self.id, &tkey, check) {
            Some(child) => child,
            None => {
                let built = Arc::new(build());
                self.transitions
                    .insert_if_absent(self.id, tkey, built, check)
            }
        };
        // This shape now has at least one child edge
        self.leaf_assumption.invalidate();
        child
    }

    /// A child shape inheriting everything but properties and allocation
    fn derived(self: &Arc<Self>, properties: PropertyMap, allocation: AllocationState) -> Shape {
        Shape {
            id: next_shape_id(),
            root_id: self.root_id,
            parent: Some(Arc::clone(self)),
            layout: Arc::clone(&self.layout),
            transitions: Arc::clone(&self.transitions),
            properties,
            dynamic_type: self.dynamic_type.clone(),
            flags: self.flags,
            bits: self.bits,
            shared_data: self.shared_data.clone(),
            allocation,
            valid_assumption: Assumption::valid(),
            leaf_assumption: Assumption::valid(),
            property_assumptions: Mutex::new(HashMap::default()),
        }
    }

    /// Invalidate the stability assumption for `key` here and in every
    /// ancestor; a change at this point in the lineage breaks their
    /// speculation that the key was stable or absent.
    fn invalidate_property_assumption(&self, key: PropertyKey) {
        if !self.property_assumptions_enabled() {
            return;
        }
        let mut current = Some(self);
        while let Some(shape) = current {
            if let Some(assumption) = shape.lock_assumptions().get(&key) {
                assumption.invalidate();
            }
            current = shape.parent.as_deref();
        }
    }

    fn lock_assumptions(&self) -> MutexGuard<'_, HashMap<PropertyKey, Assumption>> {
        self.property_assumptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shape")
            .field("id", &self.id)
            .field("properties", &self.key_list())
            .field("flags", &self.flags)
            .field("shared", &self.is_shared())
            .finish()
    }
}
