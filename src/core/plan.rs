//! Scheduling records.

use std::cmp::Ordering;

use super::{Context, ExecutorOptions, Task};
use crate::infra::queue::QueueItem;

/// A task plus how and when the scheduler should run it.
///
/// Plans are keyed by their task's ID.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Task to run.
    pub task: Task,
    /// Parent context of every run.
    pub context: Context,
    /// Cron expression; `None` runs the plan once, as soon as possible.
    pub schedule: Option<String>,
    /// Lower values dispatch first.
    pub priority: i64,
    /// Run with no other plan in flight.
    pub exclusive: bool,
    /// Executor policies; the scheduler's defaults apply when `None`.
    pub options: Option<ExecutorOptions>,
}

impl Plan {
    /// One-shot plan with priority 0.
    #[must_use]
    pub fn new(task: Task) -> Self {
        Self {
            task,
            context: Context::background(),
            schedule: None,
            priority: 0,
            exclusive: false,
            options: None,
        }
    }

    /// Fire on a cron schedule.
    #[must_use]
    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Mark the plan exclusive.
    #[must_use]
    pub const fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Set executor options.
    #[must_use]
    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Set the parent context of runs.
    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Plan key, the task ID.
    #[must_use]
    pub fn key(&self) -> &str {
        self.task.id()
    }
}

impl QueueItem for Plan {
    fn key(&self) -> &str {
        self.task.id()
    }

    fn priority(&self) -> i64 {
        self.priority
    }

    fn set_priority(&mut self, priority: i64) {
        self.priority = priority;
    }

    /// Not-yet-run before in-flight before done, then priority, creation time
    /// and ID.
    fn dispatch_order(&self, other: &Self) -> Ordering {
        self.task
            .state()
            .phase()
            .cmp(&other.task.state().phase())
            .then_with(|| self.priority.cmp(&other.priority))
            .then_with(|| self.task.created_at().cmp(&other.task.created_at()))
            .then_with(|| self.task.id().cmp(other.task.id()))
    }
}
