//! Task state machine.
//!
//! A [`Task`] is a cheaply clonable handle over shared state: the function to
//! run, its labels and timestamps, and the outcome of the latest run. Every
//! clone observes the same task.
//!
//! ```text
//! created -> running -> succeeded
//!                    -> failed
//!                    -> canceling -> canceled
//! ```
//!
//! Terminal states may be restarted. At most one run is in flight per task.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn, Instrument, Span};

use super::error::panic_message;
use super::{Context, Error};
use crate::util::clock::{elapsed_between, now};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// No run has started yet.
    Created,
    /// A run is in progress.
    Running,
    /// Cancellation requested, the function has not returned yet.
    Canceling,
    /// Last run returned without error.
    Succeeded,
    /// Last run returned an error or panicked.
    Failed,
    /// Last run observed cancellation.
    Canceled,
}

impl State {
    /// `running` or `canceling`.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Running | Self::Canceling)
    }

    /// `succeeded`, `failed` or `canceled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Ordering bucket used by dispatch queues: not yet run, in flight, done.
    #[must_use]
    pub const fn phase(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Running | Self::Canceling => 1,
            Self::Succeeded | Self::Failed | Self::Canceled => 2,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Canceling => "canceling",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The body of a task.
///
/// Implemented for every `Fn(TaskContext) -> impl Future<Output = Result<(), Error>>`
/// closure, so most callers never name this trait.
#[async_trait]
pub trait TaskFn: Send + Sync + 'static {
    /// Run once. Must return promptly after `ctx` is done.
    async fn run(&self, ctx: TaskContext) -> Result<(), Error>;
}

#[async_trait]
impl<F, Fut> TaskFn for F
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    async fn run(&self, ctx: TaskContext) -> Result<(), Error> {
        (self)(ctx).await
    }
}

/// Point-in-time view of a task, safe to serialize.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStats {
    /// Task identifier.
    pub id: String,
    /// State when the snapshot was taken.
    pub state: State,
    /// Last reported progress.
    pub progress: f64,
    /// Last stored result.
    pub result: Option<Value>,
    /// Terminal error message of the last run.
    pub error: Option<String>,
    /// Task labels.
    pub labels: BTreeMap<String, String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Start of the latest run.
    pub started_at: Option<DateTime<Utc>>,
    /// End of the latest run.
    pub ended_at: Option<DateTime<Utc>>,
    /// Duration of the latest run, or elapsed time while running.
    #[serde(with = "crate::util::duration::millis")]
    pub execution_time: Duration,
}

#[derive(Debug)]
struct Fields {
    state: State,
    progress: f64,
    result: Option<Value>,
    error: Option<Error>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    run_ctx: Option<Context>,
}

struct Inner {
    id: String,
    labels: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
    span: Span,
    func: Arc<dyn TaskFn>,
    fields: RwLock<Fields>,
    pending: watch::Sender<bool>,
}

/// Handle to a unit of cancellable, observable work.
#[derive(Clone)]
pub struct Task {
    inner: Arc<Inner>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Task {}

/// Builder for [`Task`].
#[derive(Debug, Default)]
pub struct TaskBuilder {
    id: Option<String>,
    labels: BTreeMap<String, String>,
    span: Option<Span>,
}

impl TaskBuilder {
    /// Set the task identifier. A random UUID is used when omitted.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attach a label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Replace all labels.
    #[must_use]
    pub fn labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Span the task logs into. Defaults to a `task` span under the current
    /// dispatcher.
    #[must_use]
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Finish the task with a closure body.
    pub fn build<F, Fut>(self, func: F) -> Task
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.build_task_fn(func)
    }

    /// Finish the task with any [`TaskFn`] implementation.
    pub fn build_task_fn(self, func: impl TaskFn) -> Task {
        let id = self
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("task", task_id = %id));
        let (pending, _) = watch::channel(false);
        Task {
            inner: Arc::new(Inner {
                id,
                labels: self.labels,
                created_at: now(),
                span,
                func: Arc::new(func),
                fields: RwLock::new(Fields {
                    state: State::Created,
                    progress: 0.0,
                    result: None,
                    error: None,
                    started_at: None,
                    ended_at: None,
                    run_ctx: None,
                }),
                pending,
            }),
        }
    }
}

impl Task {
    /// Create a task with the given identifier and body.
    pub fn new<F, Fut>(id: impl Into<String>, func: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Self::builder().id(id).build(func)
    }

    /// Start building a task.
    #[must_use]
    pub fn builder() -> TaskBuilder {
        TaskBuilder::default()
    }

    /// Launch a run on a new tokio task, deriving its context from `ctx`.
    ///
    /// Returns `false` without doing anything when a run is already pending.
    /// Must be called inside a tokio runtime.
    pub fn start(&self, ctx: &Context) -> bool {
        let run_ctx = {
            let mut fields = self.inner.fields.write();
            if fields.state.is_pending() {
                return false;
            }
            let run_ctx = ctx.child();
            fields.state = State::Running;
            fields.started_at = Some(now());
            fields.ended_at = None;
            fields.result = None;
            fields.error = None;
            fields.run_ctx = Some(run_ctx.clone());
            self.inner.pending.send_replace(true);
            run_ctx
        };

        let task = self.clone();
        tokio::spawn(async move { task.execute(run_ctx).await });
        true
    }

    async fn execute(self, run_ctx: Context) {
        let span = self.inner.span.clone();
        let func = Arc::clone(&self.inner.func);
        let task_ctx = TaskContext {
            task: self.clone(),
            ctx: run_ctx.clone(),
        };

        span.in_scope(|| debug!("task started"));
        // The body runs on its own tokio task so a panic surfaces as a
        // JoinError here instead of unwinding through the runtime.
        let body = tokio::spawn(async move { func.run(task_ctx).await }.instrument(span.clone()));
        let outcome = match body.await {
            Ok(res) => res,
            Err(join_err) if join_err.is_panic() => {
                let msg = panic_message(join_err.into_panic().as_ref());
                span.in_scope(|| warn!(panic = %msg, "task panicked"));
                Err(Error::Panic(msg))
            }
            Err(_) => Err(Error::Canceled),
        };
        self.finish(outcome, &run_ctx);
    }

    fn finish(&self, outcome: Result<(), Error>, run_ctx: &Context) {
        let state = {
            let mut fields = self.inner.fields.write();
            fields.ended_at = Some(now());
            fields.run_ctx = None;
            let (state, error) = match (fields.state, outcome) {
                (State::Canceling, Err(err)) => (State::Canceled, Some(err)),
                (State::Canceling, Ok(())) => (
                    State::Canceled,
                    Some(run_ctx.err().unwrap_or(Error::Canceled)),
                ),
                (_, Err(err)) => (State::Failed, Some(err)),
                (_, Ok(())) => (State::Succeeded, None),
            };
            fields.state = state;
            fields.error = error;
            state
        };
        // Release the derived context and any timer attached to it.
        run_ctx.cancel();
        self.inner.pending.send_replace(false);
        self.inner
            .span
            .in_scope(|| debug!(state = %state, "task finished"));
    }

    /// Wait for the in-flight run, if any, to complete.
    pub async fn wait(&self) {
        let mut rx = self.inner.pending.subscribe();
        let _ = rx.wait_for(|pending| !*pending).await;
    }

    /// Request cooperative cancellation of the current run.
    ///
    /// Returns `true` when the task was `running` and is now `canceling`. The
    /// function keeps running until it observes its context.
    pub fn cancel(&self) -> bool {
        let mut fields = self.inner.fields.write();
        if fields.state != State::Running {
            return false;
        }
        fields.state = State::Canceling;
        if let Some(ctx) = &fields.run_ctx {
            ctx.cancel();
        }
        drop(fields);
        self.inner.span.in_scope(|| debug!("task cancel requested"));
        true
    }

    /// Task identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Task labels.
    #[must_use]
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.inner.labels
    }

    /// Span this task logs into.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.inner.span
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> State {
        self.inner.fields.read().state
    }

    /// Last reported progress.
    #[must_use]
    pub fn progress(&self) -> f64 {
        self.inner.fields.read().progress
    }

    /// Last stored result.
    #[must_use]
    pub fn result(&self) -> Option<Value> {
        self.inner.fields.read().result.clone()
    }

    /// Last stored result decoded into `T`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when no result is stored, [`Error::InvalidArgument`]
    /// when it does not decode as `T`.
    pub fn result_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let value = self
            .result()
            .ok_or_else(|| Error::NotFound(format!("task `{}` has no result", self.id())))?;
        serde_json::from_value(value).map_err(|e| Error::InvalidArgument(e.to_string()))
    }

    /// Terminal error of the last run.
    #[must_use]
    pub fn err(&self) -> Option<Error> {
        self.inner.fields.read().error.clone()
    }

    /// Creation time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Start of the latest run.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.fields.read().started_at
    }

    /// End of the latest run.
    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.inner.fields.read().ended_at
    }

    /// Duration of the latest run, or time elapsed so far while running.
    #[must_use]
    pub fn execution_time(&self) -> Duration {
        let fields = self.inner.fields.read();
        Self::execution_time_of(&fields)
    }

    fn execution_time_of(fields: &Fields) -> Duration {
        match (fields.started_at, fields.ended_at) {
            (Some(start), Some(end)) => elapsed_between(start, end),
            (Some(start), None) => elapsed_between(start, now()),
            _ => Duration::ZERO,
        }
    }

    /// Whether the task reached a terminal state.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// Whether a run is pending.
    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.state().is_pending()
    }

    /// Snapshot of the task.
    #[must_use]
    pub fn stats(&self) -> TaskStats {
        let fields = self.inner.fields.read();
        TaskStats {
            id: self.inner.id.clone(),
            state: fields.state,
            progress: fields.progress,
            result: fields.result.clone(),
            error: fields.error.as_ref().map(ToString::to_string),
            labels: self.inner.labels.clone(),
            created_at: self.inner.created_at,
            started_at: fields.started_at,
            ended_at: fields.ended_at,
            execution_time: Self::execution_time_of(&fields),
        }
    }
}

/// What a task function sees while it runs.
#[derive(Clone)]
pub struct TaskContext {
    task: Task,
    ctx: Context,
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task", &self.task.id())
            .field("done", &self.ctx.is_done())
            .finish()
    }
}

impl TaskContext {
    /// Identifier of the running task.
    #[must_use]
    pub fn id(&self) -> &str {
        self.task.id()
    }

    /// Span to log into.
    #[must_use]
    pub fn span(&self) -> &Span {
        self.task.span()
    }

    /// Labels of the running task.
    #[must_use]
    pub fn labels(&self) -> &BTreeMap<String, String> {
        self.task.labels()
    }

    /// Report progress.
    pub fn set_progress(&self, progress: f64) {
        self.task.inner.fields.write().progress = progress;
    }

    /// Store a result value.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when `value` cannot be represented as JSON.
    pub fn set_result<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), Error> {
        let value =
            serde_json::to_value(value).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        self.task.inner.fields.write().result = Some(value);
        Ok(())
    }

    /// Cancellation context of this run.
    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.ctx
    }

    /// Whether the run has been asked to stop.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.ctx.is_done()
    }

    /// Resolve once the run has been asked to stop.
    pub async fn done(&self) {
        self.ctx.done().await;
    }

    /// Why the run has been asked to stop.
    #[must_use]
    pub fn err(&self) -> Option<Error> {
        self.ctx.err()
    }

    /// Sleep unless the run is asked to stop first.
    ///
    /// # Errors
    ///
    /// The context error when the run is cancelled or times out mid-sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Error> {
        self.ctx.sleep(duration).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_buckets() {
        assert_eq!(State::Created.phase(), 0);
        assert_eq!(State::Running.phase(), State::Canceling.phase());
        assert!(State::Failed.phase() > State::Running.phase());
        assert!(State::Canceling.is_pending());
        assert!(!State::Created.is_terminal());
        assert_eq!(State::Canceled.to_string(), "canceled");
    }

    #[test]
    fn test_builder_generates_id_and_labels() {
        let task = Task::builder()
            .label("team", "infra")
            .build(|_ctx: TaskContext| async { Ok(()) });
        assert!(uuid::Uuid::parse_str(task.id()).is_ok());
        assert_eq!(task.labels().get("team").map(String::as_str), Some("infra"));
        assert_eq!(task.state(), State::Created);
        assert!(!task.is_done());
        assert_eq!(task.execution_time(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_wait_without_run_returns() {
        let task = Task::new("idle", |_ctx: TaskContext| async { Ok(()) });
        task.wait().await;
        assert_eq!(task.state(), State::Created);
        assert!(!task.cancel());
    }

    #[tokio::test]
    async fn test_stats_serialize() {
        let task = Task::new("stats", |ctx: TaskContext| async move {
            ctx.set_progress(1.0);
            ctx.set_result(&serde_json::json!({"rows": 3}))
        });
        assert!(task.start(&Context::background()));
        task.wait().await;

        let json = serde_json::to_value(task.stats()).unwrap();
        assert_eq!(json["state"], "succeeded");
        assert_eq!(json["result"]["rows"], 3);
        assert_eq!(json["progress"], 1.0);
    }
}
