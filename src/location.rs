//! Storage locations
//!
//! A location describes how one property's value is physically stored:
//! in a primitive slot (unboxed, one machine word), in an object slot
//! (any value), as a constant held by the shape itself, or as a declared
//! default that only takes a concrete representation on first write.
//!
//! Locations are immutable and value-comparable; they are embedded in
//! properties and in transition-cache keys.

use crate::value::Value;

/// The unboxed representation kinds a primitive slot can hold.
///
/// All kinds occupy one 64-bit word, so a primitive slot can be retyped
/// in place when the layout allows it (implicit int-to-double casts).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// 64-bit signed integer
    Int,
    /// IEEE 754 double
    Double,
    /// Boolean
    Bool,
}

impl PrimitiveKind {
    /// The primitive representation of a value, if it has one
    #[inline]
    pub fn of(value: &Value) -> Option<PrimitiveKind> {
        match value {
            Value::Int(_) => Some(PrimitiveKind::Int),
            Value::Double(_) => Some(PrimitiveKind::Double),
            Value::Bool(_) => Some(PrimitiveKind::Bool),
            _ => None,
        }
    }

    /// Encode a value of this kind into its word representation
    #[inline]
    pub fn encode(self, value: &Value) -> Option<u64> {
        match (self, value) {
            (PrimitiveKind::Int, Value::Int(n)) => Some(*n as u64),
            (PrimitiveKind::Double, Value::Double(n)) => Some(n.to_bits()),
            // An int written through a double slot is widened (implicit cast)
            (PrimitiveKind::Double, Value::Int(n)) => Some((*n as f64).to_bits()),
            (PrimitiveKind::Bool, Value::Bool(b)) => Some(*b as u64),
            _ => None,
        }
    }

    /// Decode a word back into a value of this kind
    #[inline]
    pub fn decode(self, bits: u64) -> Value {
        match self {
            PrimitiveKind::Int => Value::Int(bits as i64),
            PrimitiveKind::Double => Value::Double(f64::from_bits(bits)),
            PrimitiveKind::Bool => Value::Bool(bits != 0),
        }
    }
}

/// How one property's value is physically stored
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Location {
    /// The value lives in the shape, not the object. Stores only the
    /// identical value; consumes no storage slot.
    Constant { value: Value },
    /// Untyped declaration with a default value. Consumes no slot; the
    /// first concrete write migrates it to a typed location.
    Declared { default: Value },
    /// A reference slot holding any value
    Object { slot: u32, is_final: bool },
    /// An unboxed slot holding one primitive representation.
    /// `allows_int` is the per-location implicit-cast permission: a
    /// double slot with it set accepts ints by widening. Always false
    /// for non-double kinds.
    Primitive {
        slot: u32,
        kind: PrimitiveKind,
        is_final: bool,
        allows_int: bool,
    },
}

impl Location {
    /// Whether a value of this representation fits this location.
    ///
    /// Type-level compatibility only; final locations still "can store"
    /// values of the right representation (see [`Location::can_set`]).
    pub fn can_store(&self, value: &Value) -> bool {
        match self {
            Location::Constant { value: held } => held == value,
            Location::Declared { default } => default == value,
            Location::Object { .. } => true,
            Location::Primitive {
                kind, allows_int, ..
            } => match (kind, PrimitiveKind::of(value)) {
                (k, Some(vk)) if *k == vk => true,
                // Ints fit a double slot only when the slot was allocated
                // with the implicit widening cast enabled
                (PrimitiveKind::Double, Some(PrimitiveKind::Int)) => *allows_int,
                _ => false,
            },
        }
    }

    /// Whether this location accepts a write of `value`.
    ///
    /// Constants accept only a rewrite of the identical value; final
    /// slots reject all writes after initialization.
    pub fn can_set(&self, value: &Value) -> bool {
        match self {
            Location::Constant { value: held } => held == value,
            Location::Declared { default } => default == value,
            Location::Object { is_final, .. } | Location::Primitive { is_final, .. } => {
                !is_final && self.can_store(value)
            }
        }
    }

    /// The constant or declared value held by the shape, if any
    pub fn shape_held_value(&self) -> Option<&Value> {
        match self {
            Location::Constant { value } => Some(value),
            Location::Declared { default } => Some(default),
            _ => None,
        }
    }

    /// True for constant locations
    #[inline]
    pub fn is_constant(&self) -> bool {
        matches!(self, Location::Constant { .. })
    }

    /// True for declared (not yet typed) locations
    #[inline]
    pub fn is_declared(&self) -> bool {
        matches!(self, Location::Declared { .. })
    }

    /// True if writes after initialization are rejected
    #[inline]
    pub fn is_final(&self) -> bool {
        match self {
            Location::Constant { .. } => true,
            Location::Declared { .. } => false,
            Location::Object { is_final, .. } | Location::Primitive { is_final, .. } => *is_final,
        }
    }

    /// True if this location occupies a storage slot in the object
    #[inline]
    pub fn has_slot(&self) -> bool {
        matches!(self, Location::Object { .. } | Location::Primitive { .. })
    }

    /// The shape-independent description of this location, used as part
    /// of transition-cache keys
    pub fn spec(&self) -> LocationSpec {
        match self {
            Location::Constant { value } => LocationSpec::Constant(value.clone()),
            Location::Declared { default } => LocationSpec::Declared(default.clone()),
            Location::Object { is_final, .. } => LocationSpec::Object {
                is_final: *is_final,
            },
            Location::Primitive {
                kind,
                is_final,
                allows_int,
                ..
            } => LocationSpec::Primitive {
                kind: *kind,
                is_final: *is_final,
                allows_int: *allows_int,
            },
        }
    }
}

/// A shape-independent location description.
///
/// Specs identify *what kind* of location a transition produces without
/// pinning the slot index, which is determined deterministically by the
/// parent shape's allocation state. Two transitions with equal specs from
/// the same parent are the same transition.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LocationSpec {
    /// Shape-held constant value
    Constant(Value),
    /// Declared default, untyped until first write
    Declared(Value),
    /// Reference slot
    Object { is_final: bool },
    /// Unboxed primitive slot
    Primitive {
        kind: PrimitiveKind,
        is_final: bool,
        allows_int: bool,
    },
}

impl LocationSpec {
    /// The spec of the location a fresh write of `value` needs.
    /// `int_to_double` is the owning layout's implicit-cast setting; it
    /// becomes the cast permission of double slots allocated from this spec.
    pub fn for_value(value: &Value, int_to_double: bool) -> LocationSpec {
        match PrimitiveKind::of(value) {
            Some(kind) => LocationSpec::Primitive {
                kind,
                is_final: false,
                allows_int: kind == PrimitiveKind::Double && int_to_double,
            },
            None => LocationSpec::Object { is_final: false },
        }
    }

    /// The spec generalizing an existing location so it can also store
    /// `value`. Used by migration.
    pub fn generalized_for_value(old: &Location, value: &Value, int_to_double: bool) -> LocationSpec {
        match old {
            Location::Primitive {
                kind, allows_int, ..
            } => match PrimitiveKind::of(value) {
                Some(vk) if vk == *kind => LocationSpec::Primitive {
                    kind: *kind,
                    is_final: false,
                    allows_int: *allows_int,
                },
                Some(PrimitiveKind::Double) if *kind == PrimitiveKind::Int && int_to_double => {
                    LocationSpec::Primitive {
                        kind: PrimitiveKind::Double,
                        is_final: false,
                        allows_int: true,
                    }
                }
                _ => LocationSpec::Object { is_final: false },
            },
            Location::Object { .. } => LocationSpec::Object { is_final: false },
            // First write to a declared property types the slot from the
            // incoming value alone; the default is observable only before
            // that write.
            Location::Declared { .. } => LocationSpec::for_value(value, int_to_double),
            // A constant can only migrate to a location its held value
            // still fits.
            Location::Constant { value: held } => {
                let new = LocationSpec::for_value(value, int_to_double);
                match (&new, PrimitiveKind::of(held)) {
                    (LocationSpec::Primitive { kind, .. }, Some(hk)) if *kind == hk => new,
                    (
                        LocationSpec::Primitive {
                            kind: PrimitiveKind::Double,
                            ..
                        },
                        Some(PrimitiveKind::Int),
                    ) if int_to_double => new,
                    _ => LocationSpec::Object { is_final: false },
                }
            }
        }
    }

    /// Merge two specs into one that can store values of both, or `None`
    /// if no such spec exists (distinct constants).
    pub fn generalize(&self, other: &LocationSpec, int_to_double: bool) -> Option<LocationSpec> {
        use LocationSpec::*;
        if self == other {
            return Some(self.clone());
        }
        match (self, other) {
            (Constant(a), Constant(b)) => {
                if a == b {
                    Some(Constant(a.clone()))
                } else {
                    None
                }
            }
            (
                Primitive {
                    kind: a,
                    is_final: fa,
                    allows_int: ia,
                },
                Primitive {
                    kind: b,
                    is_final: fb,
                    allows_int: ib,
                },
            ) => {
                let is_final = *fa && *fb;
                if a == b {
                    Some(Primitive {
                        kind: *a,
                        is_final,
                        allows_int: *ia || *ib,
                    })
                } else if int_to_double
                    && matches!(
                        (a, b),
                        (PrimitiveKind::Int, PrimitiveKind::Double)
                            | (PrimitiveKind::Double, PrimitiveKind::Int)
                    )
                {
                    Some(Primitive {
                        kind: PrimitiveKind::Double,
                        is_final,
                        allows_int: true,
                    })
                } else {
                    Some(Object { is_final })
                }
            }
            // Anything else can be stored in a reference slot
            _ => Some(Object { is_final: false }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::RefValue;

    #[test]
    fn test_constant_stores_only_identical_value() {
        let v = Value::Ref(RefValue::new(()));
        let loc = Location::Constant { value: v.clone() };
        assert!(loc.can_store(&v));
        assert!(loc.can_set(&v));

        let other = Value::Ref(RefValue::new(()));
        assert!(!loc.can_store(&other));
        assert!(!loc.can_set(&other));
    }

    #[test]
    fn test_primitive_kind_mismatch() {
        let loc = Location::Primitive {
            slot: 0,
            kind: PrimitiveKind::Int,
            is_final: false,
            allows_int: false,
        };
        assert!(loc.can_store(&Value::Int(1)));
        assert!(!loc.can_store(&Value::Double(1.0)));
        assert!(!loc.can_store(&Value::text("s")));
    }

    #[test]
    fn test_double_slot_int_cast_is_gated() {
        let casting = Location::Primitive {
            slot: 0,
            kind: PrimitiveKind::Double,
            is_final: false,
            allows_int: true,
        };
        assert!(casting.can_store(&Value::Int(7)));
        assert_eq!(
            PrimitiveKind::Double.encode(&Value::Int(7)),
            Some(7.0f64.to_bits())
        );

        // Without the cast permission an int does not fit a double slot
        let strict = Location::Primitive {
            slot: 0,
            kind: PrimitiveKind::Double,
            is_final: false,
            allows_int: false,
        };
        assert!(!strict.can_store(&Value::Int(7)));
        assert!(!strict.can_set(&Value::Int(7)));
        assert!(strict.can_store(&Value::Double(7.0)));
    }

    #[test]
    fn test_declared_first_write_types_from_value() {
        let declared = Location::Declared {
            default: Value::Null,
        };
        assert_eq!(
            LocationSpec::generalized_for_value(&declared, &Value::Int(1), false),
            LocationSpec::Primitive {
                kind: PrimitiveKind::Int,
                is_final: false,
                allows_int: false,
            }
        );
        assert_eq!(
            LocationSpec::generalized_for_value(&declared, &Value::text("s"), false),
            LocationSpec::Object { is_final: false }
        );
    }

    #[test]
    fn test_final_slot_rejects_writes() {
        let loc = Location::Object {
            slot: 0,
            is_final: true,
        };
        assert!(loc.can_store(&Value::Int(1)));
        assert!(!loc.can_set(&Value::Int(1)));
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        for (kind, value) in [
            (PrimitiveKind::Int, Value::Int(-5)),
            (PrimitiveKind::Double, Value::Double(2.5)),
            (PrimitiveKind::Bool, Value::Bool(true)),
        ] {
            let bits = kind.encode(&value).unwrap();
            assert_eq!(kind.decode(bits), value);
        }
    }

    #[test]
    fn test_generalize_int_double() {
        let int_spec = LocationSpec::Primitive {
            kind: PrimitiveKind::Int,
            is_final: false,
            allows_int: false,
        };
        let dbl_spec = LocationSpec::Primitive {
            kind: PrimitiveKind::Double,
            is_final: false,
            allows_int: true,
        };
        // With implicit casts the slot stays primitive and keeps the
        // cast permission
        assert_eq!(int_spec.generalize(&dbl_spec, true), Some(dbl_spec.clone()));
        // Without, it widens to a reference slot
        assert_eq!(
            int_spec.generalize(&dbl_spec, false),
            Some(LocationSpec::Object { is_final: false })
        );
    }

    #[test]
    fn test_generalize_distinct_constants_fails() {
        let a = LocationSpec::Constant(Value::Int(1));
        let b = LocationSpec::Constant(Value::Int(2));
        assert_eq!(a.generalize(&b, true), None);
        assert_eq!(a.generalize(&a, true), Some(a.clone()));
    }
}
