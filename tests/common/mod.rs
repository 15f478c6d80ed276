//! Shared test helpers for integration tests

use quickshape::{DynamicObject, Shape, Value};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Install a log subscriber once; `RUST_LOG` controls test logging
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build a fresh root shape with default configuration
pub fn root_shape() -> Arc<Shape> {
    init_tracing();
    Shape::builder().build().expect("default root shape builds")
}

/// Build an object and populate it with the given properties
#[allow(dead_code)]
pub fn object_with(root: &Arc<Shape>, properties: &[(&str, Value)]) -> DynamicObject {
    let object = DynamicObject::new(root);
    for (key, value) in properties {
        object.put(*key, value.clone()).expect("property write");
    }
    object
}
