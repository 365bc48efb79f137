//! Scheduler configuration structures.

use serde::{Deserialize, Serialize};

use crate::core::cron::CronTimezone;
use crate::core::ExecutorOptions;

/// Environment variable overriding [`SchedulerConfig::max_concurrency`].
pub const ENV_MAX_CONCURRENCY: &str = "TASK_RUNTIME_MAX_CONCURRENCY";
/// Environment variable overriding [`SchedulerConfig::timezone`].
pub const ENV_TIMEZONE: &str = "TASK_RUNTIME_TIMEZONE";

fn default_max_concurrency() -> usize {
    num_cpus::get()
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of plans executing at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// IANA timezone for cron schedules; process local time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Executor policies for plans that carry none.
    #[serde(default)]
    pub default_executor: ExecutorOptions,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            timezone: None,
            default_executor: ExecutorOptions::default(),
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be greater than 0".into());
        }
        self.cron_timezone()?;
        self.default_executor
            .validate()
            .map_err(|e| format!("default_executor invalid: {e}"))?;
        Ok(())
    }

    /// Resolved cron timezone.
    pub fn cron_timezone(&self) -> Result<CronTimezone, String> {
        self.timezone
            .as_deref()
            .map_or(Ok(CronTimezone::Local), str::parse)
            .map_err(|e| e.to_string())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `TASK_RUNTIME_*` environment variables, after
    /// loading a `.env` file when one exists.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        cfg.apply_overrides(
            std::env::var(ENV_MAX_CONCURRENCY).ok(),
            std::env::var(ENV_TIMEZONE).ok(),
        )?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_overrides(
        &mut self,
        max_concurrency: Option<String>,
        timezone: Option<String>,
    ) -> Result<(), String> {
        if let Some(raw) = max_concurrency {
            self.max_concurrency = raw
                .trim()
                .parse()
                .map_err(|e| format!("{ENV_MAX_CONCURRENCY}=`{raw}`: {e}"))?;
        }
        if let Some(tz) = timezone.filter(|tz| !tz.trim().is_empty()) {
            self.timezone = Some(tz.trim().to_owned());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply() {
        let mut cfg = SchedulerConfig::default();
        cfg.apply_overrides(Some(" 7 ".into()), Some("UTC".into()))
            .unwrap();
        assert_eq!(cfg.max_concurrency, 7);
        assert_eq!(cfg.timezone.as_deref(), Some("UTC"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_bad_override_is_reported() {
        let mut cfg = SchedulerConfig::default();
        let err = cfg.apply_overrides(Some("many".into()), None).unwrap_err();
        assert!(err.contains(ENV_MAX_CONCURRENCY));
    }

    #[test]
    fn test_blank_timezone_override_ignored() {
        let mut cfg = SchedulerConfig::default();
        cfg.apply_overrides(None, Some("  ".into())).unwrap();
        assert!(cfg.timezone.is_none());
    }
}
