//! Tests for error types

use std::time::Duration;

use prometheus_task_runtime::Error;

#[test]
fn test_conflict_error() {
    let err = Error::Conflict("task `a` is already running".to_string());
    assert_eq!(format!("{err}"), "conflict: task `a` is already running");
    assert!(err.is_conflict());
    assert!(!err.is_not_found());
}

#[test]
fn test_cooling_down_is_conflict() {
    let err = Error::cooling_down("report", Duration::from_secs(3));
    assert!(err.is_conflict());
    let msg = err.to_string();
    assert!(msg.contains("report"));
    assert!(msg.contains("remaining"));
}

#[test]
fn test_invalid_cron_error() {
    let err = Error::InvalidCron {
        expr: "61 * * * *".to_string(),
        reason: "out of range".to_string(),
    };
    assert_eq!(
        err.to_string(),
        "invalid cron expression `61 * * * *`: out of range"
    );
}

#[test]
fn test_context_errors() {
    assert!(Error::Canceled.is_context_error());
    assert!(Error::DeadlineExceeded.is_context_error());
    assert!(!Error::failed("boom").is_context_error());
    assert_eq!(Error::DeadlineExceeded.to_string(), "context deadline exceeded");
}

#[test]
fn test_task_failures_display_bare_message() {
    assert_eq!(Error::failed("disk full").to_string(), "disk full");
    assert_eq!(Error::Panic("kaboom".to_string()).to_string(), "kaboom");
    let err: Error = anyhow::anyhow!("upstream unavailable").into();
    assert_eq!(err.to_string(), "upstream unavailable");
}
