//! Benchmarks for terrace core operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use terrace::adapter::memory::MemoryCloud;
use terrace::core::builder::GraphBuilder;
use terrace::core::cancel::CancelSignal;
use terrace::core::executor::{apply, ApplyConfig};
use terrace::core::planner;
use terrace::core::retry::RetryConfig;
use terrace::core::state::{MemoryStateStore, StateStore};
use terrace::core::types::{Environment, Policy, Reference, ResourceDefinition, ResourceKind};

/// Roles where node `i` references `i - 1` and `i / 2`.
fn definitions(n: usize) -> Vec<ResourceDefinition> {
    (0..n)
        .map(|i| {
            let mut def = ResourceDefinition::new(format!("role-{i:04}"), ResourceKind::Role)
                .property("assumed_by", "lambda.amazonaws.com");
            if i > 0 {
                def = def
                    .property("prev", Reference::new(format!("role-{:04}", i - 1), "arn"))
                    .property("half", Reference::new(format!("role-{:04}", i / 2), "arn"));
            }
            def
        })
        .collect()
}

fn builder(n: usize) -> GraphBuilder {
    let mut b = GraphBuilder::new("bench");
    b.define_all(definitions(n));
    b
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");
    for n in [10, 100, 1000] {
        let b = builder(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &b, |bench, b| {
            bench.iter(|| black_box(b.build().unwrap()));
        });
    }
    group.finish();
}

fn bench_plan_fresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_fresh");
    for n in [10, 100, 1000] {
        let graph = builder(n).build().unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n), &graph, |bench, graph| {
            bench.iter(|| black_box(planner::plan(black_box(graph), None).unwrap()));
        });
    }
    group.finish();
}

fn bench_plan_noop(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_noop");
    for n in [10, 100, 1000] {
        let graph = builder(n).build().unwrap();
        let cloud = MemoryCloud::new(Environment::default());
        let store = MemoryStateStore::new();
        let policy = Policy {
            retry: RetryConfig::immediate(1),
            tripwire: false,
        };
        let cancel = CancelSignal::new();
        let cfg = ApplyConfig {
            adapter: &cloud,
            store: &store,
            policy: &policy,
            cancel: &cancel,
        };
        apply(&cfg, &planner::plan(&graph, None).unwrap()).unwrap();
        let prior = store.load("bench").unwrap().unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(n), &graph, |bench, graph| {
            bench.iter(|| {
                let plan = planner::plan(black_box(graph), Some(&prior)).unwrap();
                assert!(plan.is_empty());
                black_box(plan)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build, bench_plan_fresh, bench_plan_noop);
criterion_main!(benches);
