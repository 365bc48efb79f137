//! Configuration models for the scheduler and executor policies.

pub mod scheduler;

pub use scheduler::{SchedulerConfig, ENV_MAX_CONCURRENCY, ENV_TIMEZONE};
