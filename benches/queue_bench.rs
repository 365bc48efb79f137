//! Benchmarks for the task runtime.
//!
//! Benchmarks cover:
//! - Priority queue push/pop with random priorities
//! - Plan ordering against live task state
//! - Task start/wait round trips
//! - End-to-end scheduler draining

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prometheus_task_runtime::infra::queue::{PriorityQueue, QueueItem};
use prometheus_task_runtime::{Context, Plan, Scheduler, Task};

use tokio::runtime::Runtime;

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Debug, Clone)]
struct BenchItem {
    key: String,
    priority: i64,
}

impl QueueItem for BenchItem {
    fn key(&self) -> &str {
        &self.key
    }

    fn priority(&self) -> i64 {
        self.priority
    }

    fn set_priority(&mut self, priority: i64) {
        self.priority = priority;
    }
}

fn random_items(size: u64) -> Vec<BenchItem> {
    let mut rng = rand::rng();
    (0..size)
        .map(|i| BenchItem {
            key: format!("item-{i}"),
            priority: rng.random_range(0..100),
        })
        .collect()
}

fn noop_task(id: String) -> Task {
    Task::new(id, |_ctx| async { Ok(()) })
}

// ============================================================================
// Queue Benchmarks
// ============================================================================

fn bench_queue_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_push_pop");

    for size in [10_u64, 100, 1000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let items = random_items(size);
            b.iter(|| {
                let queue = PriorityQueue::new();
                queue.push(items.iter().cloned());
                while let Ok(item) = queue.try_pop() {
                    black_box(item);
                }
            });
        });
    }
    group.finish();
}

fn bench_queue_plan_ordering(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_plan_ordering");

    for size in [10_u64, 100] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut rng = rand::rng();
            let plans: Vec<Plan> = (0..size)
                .map(|i| Plan::new(noop_task(format!("plan-{i}"))).with_priority(rng.random_range(0..10)))
                .collect();
            b.iter(|| {
                let queue = PriorityQueue::new();
                queue.push(plans.iter().cloned());
                black_box(queue.items());
            });
        });
    }
    group.finish();
}

// ============================================================================
// Task Benchmarks
// ============================================================================

fn bench_task_round_trip(c: &mut Criterion) {
    let Ok(rt) = Runtime::new() else { return };
    let task = noop_task("round-trip".to_string());
    let ctx = Context::background();

    c.bench_function("task_start_wait", |b| {
        b.to_async(&rt).iter(|| async {
            task.start(&ctx);
            task.wait().await;
        });
    });
}

// ============================================================================
// Scheduler Benchmarks
// ============================================================================

fn bench_scheduler_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_drain");
    group.sample_size(20);

    for plan_count in [10_u64, 100] {
        group.throughput(Throughput::Elements(plan_count));
        group.bench_with_input(
            BenchmarkId::from_parameter(plan_count),
            &plan_count,
            |b, &plan_count| {
                let Ok(rt) = Runtime::new() else { return };
                b.to_async(&rt).iter(|| async move {
                    let done = Arc::new(AtomicU64::new(0));
                    let Ok(sched) = Scheduler::builder().max_concurrency(8).build() else {
                        return;
                    };
                    let plans: Vec<Plan> = (0..plan_count)
                        .map(|i| {
                            let done = Arc::clone(&done);
                            Plan::new(Task::new(format!("drain-{i}"), move |_ctx| {
                                let done = Arc::clone(&done);
                                async move {
                                    done.fetch_add(1, Ordering::Relaxed);
                                    Ok(())
                                }
                            }))
                        })
                        .collect();
                    if sched.add(plans).is_err() {
                        return;
                    }
                    sched.start(&Context::background());
                    while done.load(Ordering::Relaxed) < plan_count {
                        tokio::time::sleep(Duration::from_micros(100)).await;
                    }
                    sched.stop(true).await;
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_queue_push_pop,
    bench_queue_plan_ordering,
    bench_task_round_trip,
    bench_scheduler_drain
);
criterion_main!(benches);
