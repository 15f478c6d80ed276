//! Quickshape: a dynamic object layout engine
//!
//! Quickshape implements the hidden-class model used by dynamic-language
//! runtimes: objects carry an immutable [`Shape`] describing their layout,
//! equal layout histories converge on the identical shape instance, and
//! access sites validate an object with a single shape-identity check
//! before touching a fixed storage slot.
//!
//! # Features
//!
//! - **Shape sharing**: objects built by the same property history share
//!   one shape, across threads, via a weak transition cache
//! - **Typed storage**: ints, doubles and bools live unboxed in primitive
//!   slots; locations generalize on demand when a value stops fitting
//! - **Inline caching**: [`ReadSite`]/[`WriteSite`] cache per-shape slot
//!   lookups and degrade gracefully to a generic path when megamorphic
//! - **Speculation support**: monotone [`Assumption`]s expose shape
//!   validity, leaf-ness and per-property stability to optimizing tiers
//!
//! # Quick Start
//!
//! ```
//! use quickshape::{DynamicObject, Shape, Value};
//!
//! fn main() -> quickshape::Result<()> {
//!     let root = Shape::builder().build()?;
//!     let point = DynamicObject::new(&root);
//!     point.put("x", Value::Int(3))?;
//!     point.put("y", Value::Int(4))?;
//!     assert_eq!(point.get("x"), Some(Value::Int(3)));
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! The layout pipeline flows: property history → [`shape`] transitions →
//! [`location`]s → [`object`] storage → cached access
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Core** | [`shape`], [`location`], [`property`], [`allocator`], [`error`](Error) |
//! | **Objects** | [`object`], [`layout`], [`value`] |
//! | **Speculation** | [`assumption`], [`intern`] |

pub mod allocator;
pub mod assumption;
pub mod intern;
pub mod layout;
pub mod location;
pub mod object;
pub mod property;
pub mod shape;
pub mod value;

mod error;

pub use allocator::{AllocationState, Allocator};
pub use assumption::Assumption;
pub use error::{Error, Result};
pub use intern::PropertyKey;
pub use layout::{Layout, LayoutBuilder, Storage, StorageFactory};
pub use location::{Location, LocationSpec, PrimitiveKind};
pub use object::{DynamicObject, ReadSite, SiteStats, WriteSite, SITE_MAX_SHAPES};
pub use property::Property;
pub use shape::{CacheStats, DynamicType, Shape, ShapeBuilder, TransitionCache};
pub use value::{RefValue, Value};

/// Quickshape version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
