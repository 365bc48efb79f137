//! Tests for utility functions

use std::time::Duration;

use chrono::TimeZone;
use prometheus_task_runtime::util::{elapsed_between, now};

#[test]
fn test_now_is_utc_and_monotonic_enough() {
    let first = now();
    let second = now();
    assert!(second >= first);
    assert_eq!(elapsed_between(second, first), Duration::ZERO);
}

#[test]
fn test_elapsed_between() {
    let start = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let end = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 30).unwrap();
    assert_eq!(elapsed_between(start, end), Duration::from_secs(90));
}

#[test]
fn test_tracing_init_is_idempotent() {
    prometheus_task_runtime::util::init_tracing();
    prometheus_task_runtime::util::init_tracing();
    tracing::info!("subscriber installed");
}
