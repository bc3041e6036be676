//! Object graph construction benchmarks
//!
//! Measures how long one browsing context's global scope takes to build.
//!
//! Run with: `cargo bench -p otter-host graph`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use otter_host::graph;
use otter_host::prelude::*;
use std::hint::black_box;

/// A catalog of `n` classes in chains of 8, children declared first.
fn synthetic_catalog(n: usize) -> ClassCatalog {
    let mut catalog = ClassCatalog::new();
    for i in (0..n).rev() {
        let mut class = ClassBuilder::new(&format!("Class{i}"))
            .constant("ID", i as f64)
            .function("method", |_, _| Ok(Value::Undefined), 0)
            .function("other", |_, args| Ok(args.first().cloned().unwrap_or_default()), 1);
        if i % 8 != 0 {
            class = class.parent(&format!("Class{}", i - 1));
        }
        if i % 16 == 1 {
            class = class.requires("EXPERIMENTAL");
        }
        catalog
            .add(class.build())
            .expect("synthetic class names are unique");
    }
    catalog
        .add(ClassBuilder::new("Window").global().build())
        .expect("one global class");
    catalog.with_legacy_aliases()
}

fn build_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");

    for classes in [32, 256, 1024] {
        let catalog = synthetic_catalog(classes);
        let flags = FlagSet::new();
        group.bench_with_input(BenchmarkId::new("classes", classes), &catalog, |b, catalog| {
            b.iter(|| black_box(graph::build(catalog, &flags)));
        });
    }

    let catalog = synthetic_catalog(256);
    let flags = FlagSet::new().with("EXPERIMENTAL");
    group.bench_function("classes_256_all_features", |b| {
        b.iter(|| black_box(graph::build(&catalog, &flags)));
    });

    group.finish();
}

fn teardown_benchmark(c: &mut Criterion) {
    let catalog = synthetic_catalog(256);
    let flags = FlagSet::new();
    c.bench_function("graph_teardown_256", |b| {
        b.iter_batched(
            || graph::build(&catalog, &flags),
            |scope| scope.teardown(),
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, build_benchmark, teardown_benchmark);
criterion_main!(benches);
