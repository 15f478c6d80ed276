//! Performance benchmarks for the Quickshape layout engine
//!
//! Run with: cargo bench
//!
//! These benchmarks measure key performance characteristics:
//! - Transition cache hit cost (the steady-state shape path)
//! - Object construction with varying property counts
//! - Cached vs generic property access
//! - Migration cost when a property changes representation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use quickshape::{DynamicObject, ReadSite, Shape, Value, WriteSite};

/// Benchmark: adding a property through a warm transition cache
fn bench_cached_transition(c: &mut Criterion) {
    let root = Shape::builder().build().unwrap();
    // Warm the cache
    let _ = root.add_property("x", &Value::Int(1), 0).unwrap();

    c.bench_function("cached_transition", |b| {
        b.iter(|| {
            root.add_property(black_box("x"), black_box(&Value::Int(1)), 0)
                .unwrap()
        })
    });
}

/// Benchmark: building objects of increasing width
fn bench_object_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("object_construction");
    for width in [1usize, 4, 16, 64] {
        group.throughput(Throughput::Elements(width as u64));
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            let root = Shape::builder().build().unwrap();
            // Warm the transition chain once
            {
                let object = DynamicObject::new(&root);
                for i in 0..width {
                    object
                        .put(format!("p{}", i).as_str(), Value::Int(i as i64))
                        .unwrap();
                }
            }
            let keys: Vec<String> = (0..width).map(|i| format!("p{}", i)).collect();
            b.iter(|| {
                let object = DynamicObject::new(&root);
                for (i, key) in keys.iter().enumerate() {
                    object.put(key.as_str(), Value::Int(i as i64)).unwrap();
                }
                black_box(object)
            })
        });
    }
    group.finish();
}

/// Benchmark: property access paths
fn bench_property_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("property_access");

    let root = Shape::builder().build().unwrap();
    let object = DynamicObject::new(&root);
    object.put("x", Value::Int(42)).unwrap();

    group.bench_function("generic_get", |b| {
        b.iter(|| black_box(object.get(black_box("x"))))
    });

    group.bench_function("cached_get", |b| {
        let site = ReadSite::new("x");
        site.get(&object);
        b.iter(|| black_box(site.get(&object)))
    });

    group.bench_function("generic_put", |b| {
        b.iter(|| object.put(black_box("x"), Value::Int(7)).unwrap())
    });

    group.bench_function("cached_put", |b| {
        let site = WriteSite::new("x");
        site.put(&object, Value::Int(7)).unwrap();
        b.iter(|| site.put(&object, black_box(Value::Int(7))).unwrap())
    });

    group.finish();
}

/// Benchmark: migrating a property to a wider representation
fn bench_migration(c: &mut Criterion) {
    c.bench_function("migration_int_to_object", |b| {
        let root = Shape::builder().build().unwrap();
        b.iter(|| {
            let object = DynamicObject::new(&root);
            object.put("v", Value::Int(1)).unwrap();
            object.put("v", Value::text("wide")).unwrap();
            black_box(object)
        })
    });
}

criterion_group!(
    benches,
    bench_cached_transition,
    bench_object_construction,
    bench_property_access,
    bench_migration
);
criterion_main!(benches);
