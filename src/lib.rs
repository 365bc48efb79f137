//! # Prometheus Task Runtime
//!
//! An in-process task scheduling and execution runtime built on tokio.
//!
//! Callers submit units of work ([`Task`]s) wrapped in [`Plan`]s carrying an
//! optional cron schedule, a priority and an exclusivity flag. The
//! [`Scheduler`] dispatches them onto a bounded worker pool, each run wrapped
//! in an [`Executor`] applying retry, timeout and cooldown policies.
//!
//! ## Components
//!
//! - **Priority Queue** ([`infra::queue::PriorityQueue`]): what runs next.
//!   Orders plans by lifecycle phase, priority, creation time and ID.
//! - **Task** ([`Task`]): the unit of state. `created -> running ->
//!   {succeeded, failed, canceling -> canceled}`; panics become failures.
//! - **Executor** ([`Executor`]): how a single run behaves under failure.
//! - **Scheduler** ([`Scheduler`]): when and how many. Cron triggers enqueue
//!   plans, a fetch loop honours exclusivity, a dispatch loop bounds
//!   concurrency.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use prometheus_task_runtime::{Context, ExecutorOptions, Plan, Scheduler, Task};
//!
//! # async fn run() -> Result<(), prometheus_task_runtime::Error> {
//! let scheduler = Scheduler::builder().max_concurrency(4).build()?;
//!
//! let report = Task::new("nightly-report", |ctx| async move {
//!     ctx.set_progress(0.5);
//!     ctx.sleep(Duration::from_millis(10)).await?;
//!     ctx.set_result("done")
//! });
//!
//! scheduler.add([Plan::new(report)
//!     .with_schedule("0 0 3 * * *")
//!     .with_options(ExecutorOptions::new().with_retry(3, Duration::from_secs(30)))])?;
//!
//! let ctx = Context::background();
//! scheduler.start(&ctx);
//! // ...
//! scheduler.stop(true).await;
//! # Ok(())
//! # }
//! ```
//!
//! Cancellation is cooperative throughout: task functions observe their
//! [`TaskContext`] and return; nothing is aborted from outside.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Tasks, executors, plans, the scheduler and their errors.
pub mod core;
/// Configuration models for the scheduler and executor policies.
pub mod config;
/// Builders to construct runtime components from configuration.
pub mod builders;
/// Queue implementations backing the scheduler.
pub mod infra;
/// Shared utilities.
pub mod util;

pub use crate::core::{
    Context, Error, Executor, ExecutorOptions, ExecutorStats, Plan, RetryPolicy, Scheduler,
    State, Task, TaskContext, TaskStats,
};
