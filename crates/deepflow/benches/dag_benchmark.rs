//! DAG scheduling benchmarks
//!
//! Run with: `cargo bench --bench dag_benchmark`

use async_trait::async_trait;
use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use deepflow::workflow::RunRecordBuilder;
use deepflow::{Dag, DagExecutor, FailurePolicy, RetryPolicy, StepDefinition, StepResult, StepRunner};

/// `layers` layers of `width` steps; each step depends on every step of the previous layer
fn layered_steps(layers: usize, width: usize) -> Vec<StepDefinition> {
    let mut steps = Vec::with_capacity(layers * width);
    for layer in 0..layers {
        for i in 0..width {
            let mut step = StepDefinition::new(format!("s{}_{}", layer, i), "echo");
            if layer > 0 {
                step = step.depends_on((0..width).map(|j| format!("s{}_{}", layer - 1, j)));
            }
            steps.push(step);
        }
    }
    steps
}

/// Succeeds immediately
struct InstantRunner;

#[async_trait]
impl StepRunner for InstantRunner {
    fn should_run(&self, _step: &StepDefinition) -> bool {
        true
    }

    async fn attempt(&self, step: Arc<StepDefinition>, _attempt: u32) -> StepResult {
        StepResult::success(json!({ "id": step.id }), Duration::ZERO, None)
    }

    fn retry_policy(&self, _step: &StepDefinition) -> RetryPolicy {
        RetryPolicy::no_retry()
    }

    fn record_output(&self, _step: &StepDefinition, _output: &Value) {}
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("dag_build");
    for (layers, width) in [(5, 4), (10, 10), (20, 20)] {
        let steps = layered_steps(layers, width);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", layers, width)),
            &steps,
            |b, steps| b.iter(|| Dag::from_steps(black_box(steps.clone())).unwrap()),
        );
    }
    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let dag = Dag::from_steps(layered_steps(10, 10)).unwrap();
    let half: HashSet<String> = dag.topological_order().into_iter().take(50).collect();

    c.bench_function("dag_topological_order_10x10", |b| b.iter(|| black_box(dag.topological_order())));
    c.bench_function("dag_ready_nodes_10x10", |b| b.iter(|| black_box(dag.ready_nodes(black_box(&half)))));
}

fn bench_execute(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let dag = Dag::from_steps(layered_steps(10, 10)).unwrap();
    let runner: Arc<dyn StepRunner> = Arc::new(InstantRunner);

    let mut group = c.benchmark_group("dag_execute_10x10");
    for concurrency in [1, 4, 16] {
        let executor = DagExecutor::new(concurrency, FailurePolicy::FailFast);
        group.bench_with_input(BenchmarkId::from_parameter(concurrency), &executor, |b, executor| {
            b.to_async(&runtime).iter(|| async {
                let builder = RunRecordBuilder::new(Uuid::new_v4(), "bench", Utc::now());
                executor.execute(&dag, runner.clone(), builder).await
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build, bench_queries, bench_execute);
criterion_main!(benches);
