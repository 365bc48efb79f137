//! Tests for configuration validation

use std::time::Duration;

use prometheus_task_runtime::config::SchedulerConfig;
use prometheus_task_runtime::core::CronTimezone;
use prometheus_task_runtime::ExecutorOptions;

#[test]
fn test_scheduler_config_defaults() {
    let cfg = SchedulerConfig::default();
    assert_eq!(cfg.max_concurrency, num_cpus::get());
    assert!(cfg.timezone.is_none());
    assert_eq!(cfg.default_executor, ExecutorOptions::default());
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.cron_timezone().unwrap(), CronTimezone::Local);
}

#[test]
fn test_scheduler_config_invalid_concurrency() {
    let cfg = SchedulerConfig {
        max_concurrency: 0,
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_scheduler_config_unknown_timezone() {
    let cfg = SchedulerConfig {
        timezone: Some("Mars/Olympus_Mons".to_string()),
        ..SchedulerConfig::default()
    };
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("Mars/Olympus_Mons"));
}

#[test]
fn test_scheduler_config_named_timezone() {
    let cfg = SchedulerConfig {
        timezone: Some("Europe/Berlin".to_string()),
        ..SchedulerConfig::default()
    };
    assert_eq!(
        cfg.cron_timezone().unwrap(),
        CronTimezone::Named(chrono_tz::Europe::Berlin)
    );
}

#[test]
fn test_scheduler_config_invalid_default_executor() {
    let cfg = SchedulerConfig {
        default_executor: ExecutorOptions::new().with_retry(0, Duration::from_secs(1)),
        ..SchedulerConfig::default()
    };
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("default_executor"));
}

#[test]
fn test_scheduler_config_from_json() {
    let json = r#"
        {
            "max_concurrency": 4,
            "timezone": "UTC",
            "default_executor": {
                "timeout_ms": 30000,
                "retry": { "attempts": 3, "delay_ms": 500 },
                "cooldown_ms": 1000
            }
        }
    "#;
    let cfg = SchedulerConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.max_concurrency, 4);
    assert_eq!(cfg.timezone.as_deref(), Some("UTC"));
    assert_eq!(cfg.default_executor.timeout, Some(Duration::from_secs(30)));
    assert_eq!(cfg.default_executor.retry.as_ref().map(|r| r.attempts), Some(3));
    assert_eq!(cfg.default_executor.cooldown, Some(Duration::from_secs(1)));
    assert!(!cfg.default_executor.once);
}

#[test]
fn test_scheduler_config_from_json_rejects_invalid() {
    assert!(SchedulerConfig::from_json_str(r#"{"max_concurrency": 0}"#).is_err());
    assert!(SchedulerConfig::from_json_str("{not json").is_err());
}
