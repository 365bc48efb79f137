//! Error types for runtime operations.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by runtime components.
///
/// Values are cheap to clone because a task keeps its terminal error and
/// hands out copies to every observer.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Operation conflicts with the current state (done-and-once, cooling down,
    /// already running).
    #[error("conflict: {0}")]
    Conflict(String),
    /// Unknown task, plan, or queue key.
    #[error("not found: {0}")]
    NotFound(String),
    /// Caller supplied a malformed argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Cron expression could not be parsed.
    #[error("invalid cron expression `{expr}`: {reason}")]
    InvalidCron {
        /// Expression as supplied by the caller.
        expr: String,
        /// Parser diagnostic.
        reason: String,
    },
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The run context passed its deadline.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
    /// The run context was cancelled.
    #[error("context canceled")]
    Canceled,
    /// A task function panicked; carries the panic message.
    #[error("{0}")]
    Panic(String),
    /// A task function reported failure.
    #[error("{0}")]
    Failed(String),
    /// Any other error raised inside a task body.
    #[error("{0}")]
    Other(Arc<anyhow::Error>),
}

impl Error {
    /// Build a task failure from any displayable message.
    pub fn failed(msg: impl std::fmt::Display) -> Self {
        Self::Failed(msg.to_string())
    }

    /// Conflict raised while an executor is still cooling down.
    #[must_use]
    pub fn cooling_down(task_id: &str, remaining: Duration) -> Self {
        Self::Conflict(format!(
            "task `{task_id}` is cooling down, {remaining:?} remaining"
        ))
    }

    /// Whether this is a [`Error::Conflict`].
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether this is a [`Error::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether this error reports a context that is done
    /// ([`Error::Canceled`] or [`Error::DeadlineExceeded`]).
    #[must_use]
    pub const fn is_context_error(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(Arc::new(err))
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "task panicked with a non-string payload".to_string()
    }
}
