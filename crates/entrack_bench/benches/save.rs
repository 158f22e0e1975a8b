//! Save pipeline benchmarks.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use entrack_core::Config;
use entrack_value::KeyValues;
use entrack_testkit::{
    build_required_graph, category_model, create, graph_model, link, seeded_session, session_for,
    store_for,
};

/// Benchmark inserting a category with products, including key reconciliation.
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("save_insert");

    for count in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64 + 1));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter_batched(
                || {
                    let model = category_model();
                    let store = store_for(&model);
                    let mut session = session_for(&model, &store, Config::default());
                    let category = create(&mut session, "Category");
                    for _ in 0..count {
                        let product = create(&mut session, "Product");
                        link(&mut session, category, "Products", product);
                    }
                    session.add(category).unwrap();
                    session
                },
                |mut session| {
                    session.save_changes().unwrap();
                    session
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

/// Benchmark saving the full fixture graph.
fn bench_insert_graph(c: &mut Criterion) {
    c.bench_function("save_fixture_graph", |b| {
        b.iter_batched(
            || {
                let model = graph_model();
                let store = store_for(&model);
                let mut session = session_for(&model, &store, Config::default());
                build_required_graph(&mut session);
                session
            },
            |mut session| {
                session.save_changes().unwrap();
                session
            },
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark deleting a root whose dependents are only in the store.
fn bench_store_cascade(c: &mut Criterion) {
    c.bench_function("save_store_cascade", |b| {
        b.iter_batched(
            || {
                let (_, store, _) = seeded_session(Config::default());
                let mut session = session_for(&graph_model(), &store, Config::default());
                let root = session
                    .load("Root", &KeyValues::single(1))
                    .unwrap()
                    .unwrap();
                session.remove(root).unwrap();
                session
            },
            |mut session| {
                session.save_changes().unwrap();
                session
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_insert, bench_insert_graph, bench_store_cascade);
criterion_main!(benches);
