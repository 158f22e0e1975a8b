//! Graph tracking and change detection benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use entrack_core::{Config, ObjectId, Session};
use entrack_testkit::{category_model, create, link, seeded_session, session_for, store_for};

/// Creates an untracked category holding `count` products.
fn untracked_category(count: usize) -> (Session, ObjectId) {
    let model = category_model();
    let store = store_for(&model);
    let mut session = session_for(&model, &store, Config::default());
    let category = create(&mut session, "Category");
    for _ in 0..count {
        let product = create(&mut session, "Product");
        link(&mut session, category, "Products", product);
    }
    (session, category)
}

/// Benchmark tracking a whole graph through `add`.
fn bench_track_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("track_graph");

    for count in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64 + 1));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter_batched(
                || untracked_category(count),
                |(mut session, category)| {
                    session.add(black_box(category)).unwrap();
                    session
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

/// Benchmark detection over a tracked graph with nothing to find.
fn bench_detect_unchanged(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect_unchanged");

    for count in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64 + 1));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let (mut session, category) = untracked_category(count);
            session.add(category).unwrap();

            b.iter(|| {
                session.detect_changes().unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark detection and fixup of dependents moved between principals.
fn bench_detect_moves(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect_moves");

    for count in [10, 100].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter_batched(
                || {
                    let (mut session, category) = untracked_category(count);
                    session.add(category).unwrap();
                    let target = create(&mut session, "Category");
                    session.add(target).unwrap();
                    let products = session.collection(category, "Products").unwrap();
                    for product in products {
                        session.set_reference(product, "Category", Some(target)).unwrap();
                    }
                    session
                },
                |mut session| {
                    session.detect_changes().unwrap();
                    session
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

/// Benchmark cascading a delete through the fixture graph.
fn bench_cascade(c: &mut Criterion) {
    c.bench_function("cascade_root", |b| {
        b.iter_batched(
            || seeded_session(Config::default()),
            |(mut session, _store, graph)| {
                session.remove(graph.root).unwrap();
                session.cascade_changes().unwrap();
                session
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_track_graph,
    bench_detect_unchanged,
    bench_detect_moves,
    bench_cascade
);
criterion_main!(benches);
