//! Location allocation
//!
//! The allocator hands out non-overlapping storage slots for new
//! locations. Primitive and object slots are numbered independently so
//! unboxed values pack densely regardless of interleaving. An allocator
//! is a mutable builder; shapes carry only its immutable
//! [`AllocationState`] snapshot, from which any number of independent
//! allocators can be branched for concurrent speculative children.

use crate::error::{Error, Result};
use crate::location::{Location, LocationSpec, PrimitiveKind};
use crate::value::Value;

/// Immutable snapshot of an allocator's reservation state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocationState {
    /// Number of reserved reference slots
    pub object_slots: u32,
    /// Number of reserved primitive slots
    pub primitive_slots: u32,
}

/// Assigns storage slots to new locations in insertion order
#[derive(Clone, Debug)]
pub struct Allocator {
    state: AllocationState,
}

impl Allocator {
    /// Create an allocator with no reservations
    pub fn new() -> Self {
        Allocator {
            state: AllocationState::default(),
        }
    }

    /// Create an allocator resuming from a shape's allocation state
    pub fn from_state(state: AllocationState) -> Self {
        Allocator { state }
    }

    /// The current reservation snapshot
    pub fn state(&self) -> AllocationState {
        self.state
    }

    /// An independent copy of this allocator.
    ///
    /// Required because multiple speculative children may be allocated
    /// from the same parent state concurrently; branches never observe
    /// each other's reservations.
    pub fn copy(&self) -> Allocator {
        self.clone()
    }

    /// Allocate a location able to hold `value`'s representation.
    /// `int_to_double` is the owning layout's implicit-cast setting.
    pub fn location_for_value(
        &mut self,
        value: &Value,
        is_final: bool,
        int_to_double: bool,
    ) -> Location {
        self.location_for_kind(PrimitiveKind::of(value), is_final, int_to_double)
    }

    /// Allocate a primitive-slot location for `kind`, or an object-slot
    /// location when no unboxed representation exists. `allows_int` is
    /// only meaningful for double slots and is dropped otherwise.
    pub fn location_for_kind(
        &mut self,
        kind: Option<PrimitiveKind>,
        is_final: bool,
        allows_int: bool,
    ) -> Location {
        match kind {
            Some(kind) => {
                let slot = self.state.primitive_slots;
                self.state.primitive_slots += 1;
                Location::Primitive {
                    slot,
                    kind,
                    is_final,
                    allows_int: allows_int && kind == PrimitiveKind::Double,
                }
            }
            None => {
                let slot = self.state.object_slots;
                self.state.object_slots += 1;
                Location::Object { slot, is_final }
            }
        }
    }

    /// Materialize a location from its shape-independent spec
    pub fn location_for_spec(&mut self, spec: &LocationSpec) -> Location {
        match spec {
            LocationSpec::Constant(value) => Self::constant_location(value.clone()),
            LocationSpec::Declared(default) => Self::declared_location(default.clone()),
            LocationSpec::Object { is_final } => self.location_for_kind(None, *is_final, false),
            LocationSpec::Primitive {
                kind,
                is_final,
                allows_int,
            } => self.location_for_kind(Some(*kind), *is_final, *allows_int),
        }
    }

    /// A constant location; the value lives in the shape, no slot is used
    pub fn constant_location(value: Value) -> Location {
        Location::Constant { value }
    }

    /// A declared location; no slot is used until the first typed write
    pub fn declared_location(default: Value) -> Location {
        Location::Declared { default }
    }

    /// Reserve the slot an existing location occupies, so it will not be
    /// handed out again. Used when replaying a layout in insertion order.
    pub fn add_location(&mut self, location: &Location) -> Result<()> {
        match location {
            Location::Constant { .. } | Location::Declared { .. } => Ok(()),
            Location::Object { slot, .. } => {
                if *slot < self.state.object_slots {
                    return Err(Error::unsupported_configuration(format!(
                        "object slot {} is already reserved",
                        slot
                    )));
                }
                self.state.object_slots = slot + 1;
                Ok(())
            }
            Location::Primitive { slot, .. } => {
                if *slot < self.state.primitive_slots {
                    return Err(Error::unsupported_configuration(format!(
                        "primitive slot {} is already reserved",
                        slot
                    )));
                }
                self.state.primitive_slots = slot + 1;
                Ok(())
            }
        }
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_never_overlap() {
        let mut alloc = Allocator::new();
        let a = alloc.location_for_value(&Value::Int(1), false, false);
        let b = alloc.location_for_value(&Value::Int(2), false, false);
        let c = alloc.location_for_value(&Value::text("s"), false, false);
        assert!(matches!(a, Location::Primitive { slot: 0, .. }));
        assert!(matches!(b, Location::Primitive { slot: 1, .. }));
        assert!(matches!(c, Location::Object { slot: 0, .. }));
    }

    #[test]
    fn test_copy_is_independent() {
        let mut alloc = Allocator::new();
        alloc.location_for_value(&Value::Int(1), false, false);

        let mut branch_a = alloc.copy();
        let mut branch_b = alloc.copy();
        let a = branch_a.location_for_value(&Value::Int(2), false, false);
        let b = branch_b.location_for_value(&Value::Double(2.0), false, false);

        // Both branches allocate the same next slot
        assert!(matches!(a, Location::Primitive { slot: 1, .. }));
        assert!(matches!(b, Location::Primitive { slot: 1, .. }));
    }

    #[test]
    fn test_constants_consume_no_slot() {
        let mut alloc = Allocator::new();
        let _c = Allocator::constant_location(Value::Int(9));
        let _d = Allocator::declared_location(Value::Null);
        let loc = alloc.location_for_value(&Value::Int(1), false, false);
        assert!(matches!(loc, Location::Primitive { slot: 0, .. }));
    }

    #[test]
    fn test_add_location_rejects_reserved_slot() {
        let mut alloc = Allocator::new();
        let loc = alloc.location_for_value(&Value::Int(1), false, false);
        assert!(alloc.add_location(&loc).is_err());

        let mut replay = Allocator::new();
        assert!(replay.add_location(&loc).is_ok());
        assert_eq!(replay.state().primitive_slots, 1);
    }
}
