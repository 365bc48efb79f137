//! Retry, timeout and cooldown policies around a single task.
//!
//! An [`Executor`] is bound to one [`Task`] for its lifetime. Its counters are
//! only cleared by [`Executor::reset`], never implicitly by a new start.

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Context, Error, State, Task, TaskStats};

/// Fixed-delay retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub attempts: u32,
    /// Pause between attempts.
    #[serde(rename = "delay_ms", with = "crate::util::duration::millis")]
    pub delay: Duration,
}

impl RetryPolicy {
    /// Policy making up to `attempts` runs spaced by `delay`.
    #[must_use]
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

/// Policies applied by an [`Executor`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorOptions {
    /// Maximum run duration before the run context is cancelled.
    #[serde(
        default,
        rename = "timeout_ms",
        with = "crate::util::duration::millis_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    /// Retry policy, ignored when `once` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Lockout window after each run.
    #[serde(
        default,
        rename = "cooldown_ms",
        with = "crate::util::duration::millis_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub cooldown: Option<Duration>,
    /// Refuse to run again once the task reached a terminal state.
    #[serde(default)]
    pub once: bool,
}

impl ExecutorOptions {
    /// Options with every policy disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the run timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Retry up to `attempts` times with a fixed `delay`.
    #[must_use]
    pub const fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry = Some(RetryPolicy::new(attempts, delay));
        self
    }

    /// Set the cooldown window.
    #[must_use]
    pub const fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    /// Allow a single run only.
    #[must_use]
    pub const fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Validate option values.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a zero timeout or zero retry attempts.
    pub fn validate(&self) -> Result<(), Error> {
        if self.timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidArgument("timeout must be greater than 0".into()));
        }
        if self.retry.as_ref().is_some_and(|r| r.attempts == 0) {
            return Err(Error::InvalidArgument(
                "retry attempts must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Snapshot of an executor.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStats {
    /// Bound task snapshot.
    pub task: TaskStats,
    /// Attempts made by the current retry cycle.
    pub attempts: u32,
    /// Error message of each failed attempt, by zero-based attempt index.
    pub errors: BTreeMap<u32, String>,
    /// Time left before the executor accepts another start; zero when idle.
    #[serde(rename = "cooldown_remaining_ms", with = "crate::util::duration::millis")]
    pub cooldown_remaining: Duration,
}

#[derive(Debug)]
struct RunState {
    attempts: u32,
    errors: BTreeMap<u32, Error>,
    cooldown_until: Option<Instant>,
    halt: CancellationToken,
}

impl RunState {
    fn new() -> Self {
        Self {
            attempts: 0,
            errors: BTreeMap::new(),
            cooldown_until: None,
            halt: CancellationToken::new(),
        }
    }

    fn cooldown_remaining(&self) -> Duration {
        self.cooldown_until
            .map_or(Duration::ZERO, |until| until.saturating_duration_since(Instant::now()))
    }
}

/// Runs one task under [`ExecutorOptions`].
///
/// Running two executors against the same task at once is not supported.
#[derive(Debug)]
pub struct Executor {
    task: Task,
    options: ExecutorOptions,
    state: Mutex<RunState>,
}

impl Executor {
    /// Bind an executor to `task`.
    #[must_use]
    pub fn new(task: Task, options: ExecutorOptions) -> Self {
        Self {
            task,
            options,
            state: Mutex::new(RunState::new()),
        }
    }

    /// The bound task.
    #[must_use]
    pub const fn task(&self) -> &Task {
        &self.task
    }

    /// The applied options.
    #[must_use]
    pub const fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Run the task under the configured policies and return its terminal
    /// error.
    ///
    /// # Errors
    ///
    /// - [`Error::Conflict`] when the task is done and either `once` is set or
    ///   the cooldown window is still open, or when the task is already running
    /// - the context error when `ctx` is already done; the task is not started
    /// - otherwise the error of the last attempt
    pub async fn start(&self, ctx: &Context) -> Result<(), Error> {
        self.admit()?;
        if let Some(err) = ctx.err() {
            debug!(task_id = %self.task.id(), error = %err, "context done, not starting");
            return Err(err);
        }
        // A stop only reaches the start call in progress.
        let halt = {
            let mut state = self.state.lock();
            state.halt = CancellationToken::new();
            state.halt.clone()
        };

        let retry = if self.options.once {
            None
        } else {
            self.options.retry.clone()
        };
        let Some(retry) = retry else {
            return self.run_once(ctx).await;
        };

        let attempts = retry.attempts.max(1);
        let mut last = Ok(());
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::select! {
                    () = ctx.done() => break,
                    () = halt.cancelled() => break,
                    () = tokio::time::sleep(retry.delay) => {}
                }
                info!(task_id = %self.task.id(), attempt = attempt + 1, "retrying task");
            }

            let res = self.run_once(ctx).await;
            {
                let mut state = self.state.lock();
                state.attempts = attempt + 1;
                if let Err(err) = &res {
                    state.errors.insert(attempt, err.clone());
                }
            }
            match res {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(task_id = %self.task.id(), attempt = attempt + 1, error = %err, "task attempt failed");
                    let stop = self.task.state() == State::Canceled
                        || ctx.is_done()
                        || halt.is_cancelled()
                        || err.is_conflict();
                    last = Err(err);
                    if stop {
                        break;
                    }
                }
            }
        }
        last
    }

    fn admit(&self) -> Result<(), Error> {
        if !self.task.is_done() {
            return Ok(());
        }
        if self.options.once {
            return Err(Error::Conflict(format!(
                "task `{}` is done and may only run once",
                self.task.id()
            )));
        }
        let remaining = self.state.lock().cooldown_remaining();
        if !remaining.is_zero() {
            debug!(task_id = %self.task.id(), ?remaining, "start refused during cooldown");
            return Err(Error::cooling_down(self.task.id(), remaining));
        }
        Ok(())
    }

    async fn run_once(&self, ctx: &Context) -> Result<(), Error> {
        let run_ctx = match self.options.timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.child(),
        };
        if !self.task.start(&run_ctx) {
            run_ctx.cancel();
            return Err(Error::Conflict(format!(
                "task `{}` is already running",
                self.task.id()
            )));
        }
        self.task.wait().await;
        run_ctx.cancel();

        if let Some(cooldown) = self.options.cooldown {
            self.state.lock().cooldown_until = Some(Instant::now() + cooldown);
        }
        self.task.err().map_or(Ok(()), Err)
    }

    /// Request cancellation of the task and of any pending retry of the
    /// current [`Executor::start`] call. Later starts retry normally.
    ///
    /// Returns whether the task itself was running.
    pub fn cancel(&self) -> bool {
        self.state.lock().halt.cancel();
        self.task.cancel()
    }

    /// Cancel the task; with `wait`, also wait until its run completes.
    pub async fn stop(&self, wait: bool) {
        self.cancel();
        if wait {
            self.task.wait().await;
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> ExecutorStats {
        let state = self.state.lock();
        ExecutorStats {
            task: self.task.stats(),
            attempts: state.attempts,
            errors: state
                .errors
                .iter()
                .map(|(attempt, err)| (*attempt, err.to_string()))
                .collect(),
            cooldown_remaining: state.cooldown_remaining(),
        }
    }

    /// Errors recorded by the current retry cycle, by attempt index.
    #[must_use]
    pub fn errors(&self) -> BTreeMap<u32, Error> {
        self.state.lock().errors.clone()
    }

    /// Clear attempts, recorded errors and cooldown so the task can be reused.
    pub fn reset(&self) {
        *self.state.lock() = RunState::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_builder_and_validation() {
        let opts = ExecutorOptions::new()
            .with_timeout(Duration::from_secs(1))
            .with_retry(3, Duration::from_millis(10))
            .with_cooldown(Duration::from_secs(5));
        assert!(opts.validate().is_ok());
        assert!(!opts.once);

        let bad = ExecutorOptions::new().with_retry(0, Duration::ZERO);
        assert!(bad.validate().is_err());
        let bad = ExecutorOptions::new().with_timeout(Duration::ZERO);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_options_json_uses_millis() {
        let opts: ExecutorOptions = serde_json::from_str(
            r#"{"timeout_ms": 1500, "retry": {"attempts": 2, "delay_ms": 100}, "once": true}"#,
        )
        .unwrap();
        assert_eq!(opts.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(opts.retry, Some(RetryPolicy::new(2, Duration::from_millis(100))));
        assert_eq!(opts.cooldown, None);
        assert!(opts.once);

        let json = serde_json::to_value(&opts).unwrap();
        assert_eq!(json["timeout_ms"], 1500);
        assert!(json.get("cooldown_ms").is_none());
    }

    #[test]
    fn test_idle_stats() {
        let task = Task::new("idle", |_ctx| async { Ok(()) });
        let executor = Executor::new(task, ExecutorOptions::new());
        let stats = executor.stats();
        assert_eq!(stats.attempts, 0);
        assert!(stats.errors.is_empty());
        assert_eq!(stats.cooldown_remaining, Duration::ZERO);
    }
}
