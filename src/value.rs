//! Storable values
//!
//! This module defines the runtime representation of values the layout
//! engine can store. The engine itself is language-agnostic: a guest
//! language maps its own values onto this model. `Int`, `Double` and
//! `Bool` have unboxed primitive representations; everything else is
//! stored in reference slots.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// An opaque reference value with identity semantics.
///
/// Two `RefValue`s are equal only if they wrap the same allocation, like
/// reference equality in a managed heap. This is what constant locations
/// and dynamic type tags compare by.
#[derive(Clone)]
pub struct RefValue(Arc<dyn Any + Send + Sync>);

impl RefValue {
    /// Wrap a host value, giving it a fresh identity
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        RefValue(Arc::new(value))
    }

    /// Identity comparison (same allocation)
    #[inline]
    pub fn ptr_eq(&self, other: &RefValue) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }

    /// Attempt to view the wrapped value as a `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for RefValue {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for RefValue {}

impl Hash for RefValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for RefValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefValue({:#x})", self.addr())
    }
}

/// A value storable through a property location
#[derive(Clone, Debug)]
pub enum Value {
    /// Absent/null value
    Null,
    /// Boolean (primitive representation)
    Bool(bool),
    /// 64-bit integer (primitive representation)
    Int(i64),
    /// IEEE 754 double (primitive representation)
    Double(f64),
    /// Immutable string
    Text(Arc<str>),
    /// Opaque reference with identity semantics
    Ref(RefValue),
}

impl Value {
    /// Convenience constructor for text values
    pub fn text(s: impl AsRef<str>) -> Self {
        Value::Text(Arc::from(s.as_ref()))
    }

    /// Check if value is null
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the integer payload, if any
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the double payload, if any
    #[inline]
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the boolean payload, if any
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the text payload, if any
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // Bitwise comparison: NaN == NaN, 0.0 != -0.0. Constants and
            // transition keys need a total equivalence, not IEEE equality.
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(n) => n.hash(state),
            Value::Double(n) => n.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Ref(r) => r.hash(state),
        }
    }
}
