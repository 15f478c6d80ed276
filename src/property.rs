//! Properties
//!
//! A property is the immutable (key, location, flags) triple a shape
//! stores per field. Flags are an 8-bit, language-defined payload; the
//! engine only compares them.

use crate::intern::PropertyKey;
use crate::location::Location;

/// An immutable property descriptor within a shape
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Property {
    key: PropertyKey,
    location: Location,
    flags: u8,
}

impl Property {
    /// Create a property descriptor
    pub fn new(key: PropertyKey, location: Location, flags: u8) -> Self {
        Property {
            key,
            location,
            flags,
        }
    }

    /// The property's key
    #[inline]
    pub fn key(&self) -> PropertyKey {
        self.key
    }

    /// The property's storage location
    #[inline]
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// The property's language-defined flags
    #[inline]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// A copy of this property with a different location (same key and
    /// flags). Used when a layout is rebuilt or a location is generalized.
    pub fn relocate(&self, location: Location) -> Property {
        Property {
            key: self.key,
            location,
            flags: self.flags,
        }
    }

    /// A copy of this property with different flags
    pub fn with_flags(&self, flags: u8) -> Property {
        Property {
            key: self.key,
            location: self.location.clone(),
            flags,
        }
    }
}
