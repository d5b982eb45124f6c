use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use trellis_auth::{Role, RoleId};
use trellis_core::NewNode;
use trellis_core::closure::reconcile;
use trellis_infra::Hierarchy;
use trellis_infra::jobs::{InMemoryJobStore, JobQueueScheduler};
use trellis_infra::store::{HierarchyStore, InMemoryHierarchyStore, PathStore};

type Engine = Hierarchy<Role, InMemoryHierarchyStore<Role>>;

fn engine_with_nodes(n: i64) -> Engine {
    let hierarchy = Hierarchy::builder(
        InMemoryHierarchyStore::new(),
        Arc::new(JobQueueScheduler::new(InMemoryJobStore::arc())),
    )
    .build();
    for i in 0..n {
        hierarchy
            .add_node(NewNode::new(format!("role-{i}"), format!("Role {i}")).with_id(i))
            .unwrap();
    }
    hierarchy
}

/// `0 → 1 → … → n-1`, linked top-down.
fn link_chain(hierarchy: &Engine, n: i64) {
    for i in 1..n {
        hierarchy
            .add_ancestor_edge(RoleId::new(i), RoleId::new(i - 1))
            .unwrap();
    }
}

fn bench_chain_linking(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_linking");

    for n in [10i64, 50, 200].iter() {
        group.throughput(Throughput::Elements((*n - 1) as u64));
        group.bench_with_input(BenchmarkId::new("top_down", n), n, |b, &n| {
            b.iter_batched(
                || engine_with_nodes(n),
                |hierarchy| link_chain(&hierarchy, n),
                BatchSize::SmallInput,
            );
        });
        group.bench_with_input(BenchmarkId::new("bottom_up", n), n, |b, &n| {
            b.iter_batched(
                || engine_with_nodes(n),
                |hierarchy| {
                    for i in (1..n).rev() {
                        hierarchy
                            .add_ancestor_edge(RoleId::new(i), RoleId::new(i - 1))
                            .unwrap();
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_leaf_detach(c: &mut Criterion) {
    let mut group = c.benchmark_group("leaf_detach");

    for n in [10i64, 50, 200].iter() {
        group.bench_with_input(BenchmarkId::new("detach_and_relink", n), n, |b, &n| {
            let hierarchy = engine_with_nodes(n);
            link_chain(&hierarchy, n);
            let (parent, leaf) = (RoleId::new(n - 2), RoleId::new(n - 1));

            b.iter(|| {
                hierarchy.delete_path(black_box(parent), black_box(leaf)).unwrap();
                hierarchy.add_ancestor_edge(leaf, parent).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");

    for n in [10i64, 50, 200].iter() {
        let hierarchy = engine_with_nodes(*n);
        link_chain(&hierarchy, *n);
        let paths = {
            let mut tx = hierarchy.store().begin().unwrap();
            tx.all_paths().unwrap()
        };

        group.throughput(Throughput::Elements(paths.len() as u64));
        group.bench_with_input(BenchmarkId::new("closed_chain", n), &paths, |b, paths| {
            b.iter(|| black_box(reconcile(paths)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_chain_linking, bench_leaf_detach, bench_reconcile);
criterion_main!(benches);
