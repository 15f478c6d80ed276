//! Error types for the Quickshape layout engine
//!
//! All failures in this crate are synchronous, caller-correctable outcomes.
//! There is no retry, no fatal condition, and transition-cache races are
//! never surfaced here (they are resolved internally).

use thiserror::Error;

/// Main error type for Quickshape
#[derive(Error, Debug)]
pub enum Error {
    /// Adding a property whose key already exists via the add-only entry point
    #[error("DuplicateKey: property '{key}' already exists in this shape")]
    DuplicateKey { key: String },

    /// Lookup or removal of an absent key
    #[error("NoSuchProperty: '{key}'")]
    NoSuchProperty { key: String },

    /// A value cannot be stored through a given location (wrong
    /// representation, or a final/constant location rejecting a new value)
    #[error("IncompatibleValue: {message}")]
    IncompatibleValue { message: String },

    /// An operation requires a capability not enabled when the root shape
    /// was built, or a configuration value is out of range
    #[error("UnsupportedConfiguration: {message}")]
    UnsupportedConfiguration { message: String },
}

impl Error {
    /// Create a DuplicateKey error
    pub fn duplicate_key(key: impl Into<String>) -> Self {
        Error::DuplicateKey { key: key.into() }
    }

    /// Create a NoSuchProperty error
    pub fn no_such_property(key: impl Into<String>) -> Self {
        Error::NoSuchProperty { key: key.into() }
    }

    /// Create an IncompatibleValue error
    pub fn incompatible_value(message: impl Into<String>) -> Self {
        Error::IncompatibleValue {
            message: message.into(),
        }
    }

    /// Create an UnsupportedConfiguration error
    pub fn unsupported_configuration(message: impl Into<String>) -> Self {
        Error::UnsupportedConfiguration {
            message: message.into(),
        }
    }
}

/// Result type alias for Quickshape
pub type Result<T> = std::result::Result<T, Error>;
