//! Dynamic objects
//!
//! A [`DynamicObject`] pairs a shape with the physical storage its
//! locations index into. All structural operations go through the shape:
//! the object never grows a property on its own, it migrates to the shape
//! that already describes the new layout and reshuffles its storage to
//! match.

mod access;

pub use access::{ReadSite, SiteStats, WriteSite, SITE_MAX_SHAPES};

use crate::error::{Error, Result};
use crate::intern::PropertyKey;
use crate::layout::Storage;
use crate::location::Location;
use crate::shape::{DynamicType, Shape};
use crate::value::Value;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

/// Shape plus storage, swapped atomically on migration
struct ObjectState {
    shape: Arc<Shape>,
    storage: Storage,
}

/// An object whose layout is described by a shape.
///
/// Reads take a shared lock, structural changes an exclusive one, so a
/// reader always observes a consistent (shape, storage) pair even while
/// another thread migrates the object.
pub struct DynamicObject {
    state: RwLock<ObjectState>,
}

impl DynamicObject {
    /// Create an object with the given initial shape. Storage for every
    /// slot the shape describes is allocated up front.
    pub fn new(shape: &Arc<Shape>) -> Self {
        let storage = shape.layout().factory().create(&shape.allocation_state());
        DynamicObject {
            state: RwLock::new(ObjectState {
                shape: Arc::clone(shape),
                storage,
            }),
        }
    }

    /// The object's current shape
    pub fn shape(&self) -> Arc<Shape> {
        Arc::clone(&self.read().shape)
    }

    /// Read a property value
    pub fn get(&self, key: impl Into<PropertyKey>) -> Option<Value> {
        let state = self.read();
        let property = state.shape.get_property(key.into())?;
        Some(read_value(property.location(), &state.storage))
    }

    /// Read a property value, falling back to a default when absent
    pub fn get_or(&self, key: impl Into<PropertyKey>, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Whether the object currently has the property
    pub fn contains_key(&self, key: impl Into<PropertyKey>) -> bool {
        self.read().shape.has_property(key.into())
    }

    /// The object's property keys in insertion order
    pub fn keys(&self) -> Vec<PropertyKey> {
        self.read().shape.key_list()
    }

    /// Write a property, adding it (with empty flags) if absent.
    ///
    /// Existing properties keep their flags. Fails with
    /// `IncompatibleValue` when the property is final or constant and the
    /// value differs; the object is left unchanged in that case.
    pub fn put(&self, key: impl Into<PropertyKey>, value: Value) -> Result<()> {
        let key = key.into();
        let mut state = self.write();
        let flags = state.shape.get_property(key).map(|p| p.flags());
        self.put_locked(&mut state, key, value, flags.unwrap_or(0))
    }

    /// Write a property with explicit flags, adding or redefining as
    /// needed (flag changes migrate the object to a sibling shape)
    pub fn put_with_flags(
        &self,
        key: impl Into<PropertyKey>,
        value: Value,
        flags: u8,
    ) -> Result<()> {
        let mut state = self.write();
        self.put_locked(&mut state, key.into(), value, flags)
    }

    /// Attach a shape-held constant property. Consumes no storage; fails
    /// with `DuplicateKey` if the key already exists.
    pub fn put_constant(
        &self,
        key: impl Into<PropertyKey>,
        value: Value,
        flags: u8,
    ) -> Result<()> {
        let mut state = self.write();
        let new_shape = state.shape.add_constant_property(key, value, flags)?;
        migrate(&mut state, new_shape)
    }

    /// Remove a property. Returns `false` when the key was absent.
    pub fn remove(&self, key: impl Into<PropertyKey>) -> Result<bool> {
        let key = key.into();
        let mut state = self.write();
        if !state.shape.has_property(key) {
            return Ok(false);
        }
        let new_shape = state.shape.remove_property(key)?;
        migrate(&mut state, new_shape)?;
        Ok(true)
    }

    /// The object's dynamic type tag
    pub fn dynamic_type(&self) -> DynamicType {
        self.read().shape.dynamic_type().clone()
    }

    /// Retag the object (layout and storage are untouched)
    pub fn set_dynamic_type(&self, dynamic_type: DynamicType) {
        let mut state = self.write();
        let new_shape = state.shape.change_type(dynamic_type);
        state.shape = new_shape;
    }

    /// The shape's 8-bit flag payload
    pub fn shape_flags(&self) -> u8 {
        self.read().shape.flags()
    }

    /// Change the shape flag payload (layout and storage are untouched)
    pub fn set_shape_flags(&self, flags: u32) -> Result<()> {
        let mut state = self.write();
        let new_shape = state.shape.change_flags(flags)?;
        state.shape = new_shape;
        Ok(())
    }

    /// Whether the object's shape is shared
    pub fn is_shared(&self) -> bool {
        self.read().shape.is_shared()
    }

    /// Switch the object to the shared variant of its shape, enabling the
    /// no-slot-reuse policy for everything that follows
    pub fn make_shared(&self) {
        let mut state = self.write();
        let new_shape = state.shape.make_shared_shape();
        state.shape = new_shape;
    }

    // ---- internals ----------------------------------------------------

    fn put_locked(
        &self,
        state: &mut ObjectState,
        key: PropertyKey,
        value: Value,
        flags: u8,
    ) -> Result<()> {
        if let Some(property) = state.shape.get_property(key) {
            let location = property.location().clone();
            if property.flags() == flags && location.can_set(&value) {
                return write_value(&location, &mut state.storage, value);
            }
            if location.is_final() && location.can_store(&value) {
                return Err(Error::incompatible_value(format!(
                    "cannot overwrite final property '{}'",
                    key
                )));
            }
        }

        let new_shape = state.shape.define_property(key, &value, flags)?;
        if !Arc::ptr_eq(&new_shape, &state.shape) {
            migrate(state, new_shape)?;
        }
        let location = state
            .shape
            .get_property(key)
            .map(|p| p.location().clone())
            .ok_or_else(|| Error::no_such_property(key.resolve()))?;
        write_value(&location, &mut state.storage, value)
    }

    /// Shape-guarded cached read used by access sites: succeeds only when
    /// the object still has the expected shape
    pub(crate) fn read_if_shape(&self, shape_id: u64, location: &Location) -> Option<Value> {
        let state = self.read();
        if state.shape.id() != shape_id {
            return None;
        }
        Some(read_value(location, &state.storage))
    }

    /// Shape-guarded cached write used by access sites
    pub(crate) fn write_if_shape(
        &self,
        shape_id: u64,
        location: &Location,
        value: Value,
    ) -> Option<Result<()>> {
        let mut state = self.write();
        if state.shape.id() != shape_id || !location.can_set(&value) {
            return None;
        }
        Some(write_value(location, &mut state.storage, value))
    }

    fn read(&self) -> RwLockReadGuard<'_, ObjectState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ObjectState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Move the object to `new_shape`, carrying every surviving value over to
/// its (possibly relocated) slot.
fn migrate(state: &mut ObjectState, new_shape: Arc<Shape>) -> Result<()> {
    trace!(
        from = state.shape.id(),
        to = new_shape.id(),
        "migrating object"
    );
    if is_append_of(&state.shape, &new_shape) {
        // Existing slots are untouched; just grow the buffers
        new_shape
            .layout()
            .factory()
            .grow(&mut state.storage, &new_shape.allocation_state());
        state.shape = new_shape;
        return Ok(());
    }

    let old_values: Vec<(PropertyKey, Value)> = state
        .shape
        .property_list()
        .iter()
        .map(|p| (p.key(), read_value(p.location(), &state.storage)))
        .collect();
    let mut storage = new_shape
        .layout()
        .factory()
        .create(&new_shape.allocation_state());
    for property in new_shape.property_list() {
        if !property.location().has_slot() {
            continue;
        }
        if let Some((_, value)) = old_values.iter().find(|(k, _)| *k == property.key()) {
            // A declared default may have no representation in its typed
            // successor slot; the write that triggered this migration
            // fills that slot right after.
            if !property.location().can_store(value) {
                continue;
            }
            write_value(property.location(), &mut storage, value.clone())?;
        }
    }
    state.shape = new_shape;
    state.storage = storage;
    Ok(())
}

/// Whether `new` extends `old` without relocating any existing property
fn is_append_of(old: &Shape, new: &Shape) -> bool {
    if new.property_count() < old.property_count() {
        return false;
    }
    let new_props = new.property_list();
    old.property_list()
        .iter()
        .zip(new_props.iter())
        .all(|(a, b)| a == b)
}

fn read_value(location: &Location, storage: &Storage) -> Value {
    match location {
        Location::Constant { value } => value.clone(),
        Location::Declared { default } => default.clone(),
        Location::Object { slot, .. } => storage.objects[*slot as usize].clone(),
        Location::Primitive { slot, kind, .. } => kind.decode(storage.primitives[*slot as usize]),
    }
}

fn write_value(location: &Location, storage: &mut Storage, value: Value) -> Result<()> {
    match location {
        // Shape-held locations store nothing; compatibility was already
        // established through can_set/can_store
        Location::Constant { .. } | Location::Declared { .. } => Ok(()),
        Location::Object { slot, .. } => {
            storage.objects[*slot as usize] = value;
            Ok(())
        }
        Location::Primitive { slot, kind, .. } => {
            let bits = kind.encode(&value).ok_or_else(|| {
                Error::incompatible_value(format!(
                    "value has no {:?} representation",
                    kind
                ))
            })?;
            storage.primitives[*slot as usize] = bits;
            Ok(())
        }
    }
}
