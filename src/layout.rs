//! Storage backend boundary
//!
//! The layout engine never manufactures physical storage itself; it asks
//! a [`StorageFactory`] to do so and treats the result opaquely. A
//! [`Layout`] bundles the factory with layout-wide configuration such as
//! the implicit int-to-double cast that lets a primitive slot be retyped
//! in place. Factories are deduplicated through a process-wide
//! get-or-create registry so the same backend pair always yields the same
//! generator instance.

use crate::allocator::AllocationState;
use crate::value::Value;
use rustc_hash::FxHashMap as HashMap;
use std::any::{Any, TypeId};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

/// Concrete backing storage for one object: a primitive word buffer and
/// a reference buffer, indexed by the slots the allocator assigned.
#[derive(Clone, Debug, Default)]
pub struct Storage {
    /// Unboxed primitive words
    pub primitives: Vec<u64>,
    /// Reference values
    pub objects: Vec<Value>,
}

impl Storage {
    /// Whether this storage covers every slot of `state`
    pub fn covers(&self, state: &AllocationState) -> bool {
        self.primitives.len() >= state.primitive_slots as usize
            && self.objects.len() >= state.object_slots as usize
    }
}

/// Manufactures and grows object storage for a layout.
///
/// Implementations must be pure with respect to the allocation state:
/// creating storage twice for the same state yields interchangeable
/// results.
pub trait StorageFactory: Send + Sync {
    /// Create storage covering at least the given allocation state
    fn create(&self, state: &AllocationState) -> Storage;

    /// Grow existing storage in place to cover the given allocation
    /// state. Existing slot contents are preserved.
    fn grow(&self, storage: &mut Storage, state: &AllocationState);
}

/// Default vec-backed storage factory.
///
/// Reserves a few slots of headroom so that the common "add a handful of
/// properties right after construction" pattern does not reallocate per
/// property.
#[derive(Debug, Default)]
pub struct VecStorageFactory;

/// Extra capacity reserved beyond the requested slot count
const STORAGE_HEADROOM: usize = 4;

impl StorageFactory for VecStorageFactory {
    fn create(&self, state: &AllocationState) -> Storage {
        let mut storage = Storage::default();
        self.grow(&mut storage, state);
        storage
    }

    fn grow(&self, storage: &mut Storage, state: &AllocationState) {
        let want_prims = state.primitive_slots as usize;
        if storage.primitives.len() < want_prims {
            storage.primitives.reserve(want_prims - storage.primitives.len() + STORAGE_HEADROOM);
            storage.primitives.resize(want_prims, 0);
        }
        let want_objs = state.object_slots as usize;
        if storage.objects.len() < want_objs {
            storage.objects.reserve(want_objs - storage.objects.len() + STORAGE_HEADROOM);
            storage.objects.resize(want_objs, Value::Null);
        }
    }
}

/// Layout-wide configuration shared by every shape in a lineage
pub struct Layout {
    int_to_double: bool,
    factory: Arc<dyn StorageFactory>,
}

impl Layout {
    /// Start building a layout
    pub fn new_layout() -> LayoutBuilder {
        LayoutBuilder::default()
    }

    /// A layout with default configuration and the shared vec-backed factory
    pub fn default_layout() -> Arc<Layout> {
        Layout::new_layout().build()
    }

    /// Whether an int may be widened into a double slot in place
    #[inline]
    pub fn allows_int_to_double(&self) -> bool {
        self.int_to_double
    }

    /// The storage factory backing objects of this layout
    pub fn factory(&self) -> &Arc<dyn StorageFactory> {
        &self.factory
    }
}

impl std::fmt::Debug for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layout")
            .field("int_to_double", &self.int_to_double)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Layout`] instances
#[derive(Default)]
pub struct LayoutBuilder {
    int_to_double: bool,
    factory: Option<Arc<dyn StorageFactory>>,
}

impl LayoutBuilder {
    /// Allow ints to be stored through double slots, so an int property
    /// later written as a double keeps its primitive slot on migration
    pub fn allow_int_to_double(mut self, allow: bool) -> Self {
        self.int_to_double = allow;
        self
    }

    /// Use a custom storage factory instead of the shared default
    pub fn storage_factory(mut self, factory: Arc<dyn StorageFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Build the layout
    pub fn build(self) -> Arc<Layout> {
        let factory = self
            .factory
            .unwrap_or_else(|| generator_for::<Storage, VecStorageFactory>());
        Arc::new(Layout {
            int_to_double: self.int_to_double,
            factory,
        })
    }
}

/// Process-wide generator registry: one factory instance per
/// (storage type, factory type) pair
static GENERATORS: OnceLock<Mutex<HashMap<(TypeId, TypeId), Arc<dyn StorageFactory>>>> =
    OnceLock::new();

/// Get or create the canonical factory instance for a storage/factory
/// type pair. Idempotent and thread-safe: every caller with the same
/// pair observes the same instance.
pub fn generator_for<S, F>() -> Arc<dyn StorageFactory>
where
    S: Any,
    F: StorageFactory + Default + 'static,
{
    let key = (TypeId::of::<S>(), TypeId::of::<F>());
    let registry = GENERATORS.get_or_init(|| Mutex::new(HashMap::default()));
    let mut guard = registry.lock().unwrap_or_else(|e| e.into_inner());
    guard
        .entry(key)
        .or_insert_with(|| {
            debug!(?key, "creating storage generator");
            Arc::new(F::default())
        })
        .clone()
}
