//! Tests for builder modules

use std::time::Duration;

use prometheus_task_runtime::builders::{build_scheduler, SchedulerBuilder};
use prometheus_task_runtime::config::SchedulerConfig;
use prometheus_task_runtime::{Error, ExecutorOptions, Scheduler};

#[test]
fn test_scheduler_builder_defaults() {
    let sched = SchedulerBuilder::new().build().unwrap();
    assert_eq!(
        sched.max_concurrency(),
        SchedulerConfig::default().max_concurrency
    );
    assert!(!sched.is_running());
    assert_eq!(sched.pending(), 0);
    assert_eq!(sched.scheduled(), 0);
}

#[test]
fn test_scheduler_builder_overrides() {
    let sched = Scheduler::builder()
        .max_concurrency(2)
        .default_options(ExecutorOptions::new().with_timeout(Duration::from_secs(5)))
        .span(tracing::info_span!("jobs"))
        .build()
        .unwrap();
    assert_eq!(sched.max_concurrency(), 2);
}

#[test]
fn test_scheduler_builder_rejects_zero_concurrency() {
    let err = SchedulerBuilder::new().max_concurrency(0).build().unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn test_scheduler_builder_rejects_invalid_defaults() {
    let err = SchedulerBuilder::new()
        .default_options(ExecutorOptions::new().with_timeout(Duration::ZERO))
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn test_build_scheduler_from_config() {
    let cfg = SchedulerConfig {
        max_concurrency: 3,
        timezone: Some("UTC".to_string()),
        ..SchedulerConfig::default()
    };
    let sched = build_scheduler(&cfg).unwrap();
    assert_eq!(sched.max_concurrency(), 3);

    let bad = SchedulerConfig {
        timezone: Some("Nowhere/City".to_string()),
        ..SchedulerConfig::default()
    };
    assert!(matches!(Scheduler::new(&bad), Err(Error::InvalidConfig(_))));
}
