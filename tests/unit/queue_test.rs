//! Tests for the plan queue

use std::time::Duration;

use prometheus_task_runtime::infra::queue::{PriorityQueue, QueueItem};
use prometheus_task_runtime::{Context, Plan, Task};

fn sleeper(id: &str) -> Task {
    Task::new(id, |ctx| async move { ctx.sleep(Duration::from_secs(5)).await })
}

#[tokio::test]
async fn test_order_follows_live_task_state() {
    let busy = sleeper("busy");
    let idle = sleeper("idle");
    let q = PriorityQueue::new();
    q.push([
        Plan::new(busy.clone()).with_priority(0),
        Plan::new(idle.clone()).with_priority(1),
    ]);
    assert_eq!(q.items()[0].key(), "busy");

    // Starting the task after it was queued moves it behind not-yet-run plans.
    assert!(busy.start(&Context::background()));
    assert_eq!(q.pop().await.unwrap().key(), "idle");
    assert_eq!(q.pop().await.unwrap().key(), "busy");

    busy.cancel();
    busy.wait().await;
}

#[test]
fn test_update_changes_plan_priority() {
    let q = PriorityQueue::new();
    let a = Plan::new(sleeper("a")).with_priority(1);
    let b = Plan::new(sleeper("b")).with_priority(2);
    q.push([a, b.clone()]);

    q.update(&b.with_priority(0)).unwrap();
    let head = q.try_pop().unwrap();
    assert_eq!(head.key(), "b");
    assert_eq!(head.priority(), 0);
}

#[test]
fn test_requeue_replaces_pending_plan() {
    let q = PriorityQueue::new();
    let task = sleeper("dup");
    q.push([Plan::new(task.clone()).with_priority(5)]);
    q.push([Plan::new(task).with_priority(7)]);
    assert_eq!(q.len(), 1);
    assert_eq!(q.try_pop().unwrap().priority(), 7);
}
