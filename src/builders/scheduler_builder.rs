//! Builder for [`Scheduler`].

use tracing::Span;

use crate::config::SchedulerConfig;
use crate::core::cron::CronTimezone;
use crate::core::{Error, ExecutorOptions, Scheduler};

/// Fluent construction of a [`Scheduler`].
#[derive(Debug)]
pub struct SchedulerBuilder {
    max_concurrency: usize,
    timezone: CronTimezone,
    default_options: ExecutorOptions,
    span: Option<Span>,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBuilder {
    /// Builder seeded with [`SchedulerConfig::default`].
    #[must_use]
    pub fn new() -> Self {
        let cfg = SchedulerConfig::default();
        Self {
            max_concurrency: cfg.max_concurrency,
            timezone: CronTimezone::Local,
            default_options: cfg.default_executor,
            span: None,
        }
    }

    /// Builder seeded from a configuration.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] when the configuration does not validate.
    pub fn from_config(cfg: &SchedulerConfig) -> Result<Self, Error> {
        cfg.validate().map_err(Error::InvalidConfig)?;
        Ok(Self {
            max_concurrency: cfg.max_concurrency,
            timezone: cfg.cron_timezone().map_err(Error::InvalidConfig)?,
            default_options: cfg.default_executor.clone(),
            span: None,
        })
    }

    /// Maximum number of plans executing at once.
    #[must_use]
    pub const fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Timezone cron schedules are evaluated in.
    #[must_use]
    pub const fn timezone(mut self, timezone: CronTimezone) -> Self {
        self.timezone = timezone;
        self
    }

    /// Executor policies for plans that carry none.
    #[must_use]
    pub fn default_options(mut self, options: ExecutorOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Span the scheduler logs into. Defaults to a `scheduler` span under the
    /// current dispatcher.
    #[must_use]
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] for a zero concurrency bound or invalid
    /// default executor options.
    pub fn build(self) -> Result<Scheduler, Error> {
        if self.max_concurrency == 0 {
            return Err(Error::InvalidConfig(
                "max_concurrency must be greater than 0".into(),
            ));
        }
        self.default_options
            .validate()
            .map_err(|e| Error::InvalidConfig(format!("default_executor invalid: {e}")))?;
        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("scheduler"));
        Ok(Scheduler::from_parts(
            self.max_concurrency,
            self.timezone,
            self.default_options,
            span,
        ))
    }
}

/// Build a scheduler from configuration.
///
/// # Errors
///
/// [`Error::InvalidConfig`] when the configuration does not validate.
pub fn build_scheduler(cfg: &SchedulerConfig) -> Result<Scheduler, Error> {
    SchedulerBuilder::from_config(cfg)?.build()
}
