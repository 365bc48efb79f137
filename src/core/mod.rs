//! Core runtime: tasks, executors, plans and the scheduler.

pub mod context;
pub mod cron;
pub mod error;
pub mod executor;
pub mod plan;
pub mod scheduler;
pub mod task;

pub use context::Context;
pub use cron::{parse_schedule, CronTable, CronTimezone, EntryId};
pub use error::{AppResult, Error};
pub use executor::{Executor, ExecutorOptions, ExecutorStats, RetryPolicy};
pub use plan::Plan;
pub use scheduler::Scheduler;
pub use task::{State, Task, TaskBuilder, TaskContext, TaskFn, TaskStats};
