//! Cancellation contexts.
//!
//! A [`Context`] is a cancellation token with an optional deadline and a
//! recorded cause. Contexts form a tree: cancelling a parent cancels every
//! derived child, and a child reports its parent's cause when it was cancelled
//! through the parent. Task functions receive one and are expected to poll
//! [`Context::is_done`] or await [`Context::done`]; nothing is preempted.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::Error;

/// Cooperative cancellation context with optional deadline.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    cause: Arc<Mutex<Option<Error>>>,
    parent: Option<Arc<Context>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A root context that is never cancelled unless [`Context::cancel`] is
    /// called on it.
    #[must_use]
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            cause: Arc::new(Mutex::new(None)),
            parent: None,
        }
    }

    /// Derive a cancellable child context.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            cause: Arc::new(Mutex::new(None)),
            parent: Some(Arc::new(self.clone())),
        }
    }

    /// Derive a child context that cancels itself with
    /// [`Error::DeadlineExceeded`] once `timeout` elapses.
    ///
    /// The effective deadline never extends past the parent's. Must be called
    /// inside a tokio runtime.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now() + timeout;
        let deadline = self.deadline.map_or(own, |parent| parent.min(own));
        let mut child = self.child();
        child.deadline = Some(deadline);

        let timer = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = timer.token.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {
                    timer.cancel_with(Error::DeadlineExceeded);
                }
            }
        });
        child
    }

    /// Request cancellation of this context and all its descendants.
    pub fn cancel(&self) {
        self.cancel_with(Error::Canceled);
    }

    fn cancel_with(&self, cause: Error) {
        {
            let mut slot = self.cause.lock();
            if slot.is_none() && !self.token.is_cancelled() {
                *slot = Some(cause);
            }
        }
        self.token.cancel();
    }

    /// Whether the context has been cancelled or has passed its deadline.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve once the context is done.
    pub async fn done(&self) {
        self.token.cancelled().await;
    }

    /// Why the context is done, or `None` while it is live.
    #[must_use]
    pub fn err(&self) -> Option<Error> {
        if !self.token.is_cancelled() {
            return None;
        }
        if let Some(cause) = self.cause.lock().clone() {
            return Some(cause);
        }
        Some(
            self.parent
                .as_ref()
                .and_then(|parent| parent.err())
                .unwrap_or(Error::Canceled),
        )
    }

    /// Deadline of this context, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Underlying cancellation token, for `select!` against other futures.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Sleep for `duration` unless the context finishes first.
    ///
    /// # Errors
    ///
    /// Returns the context's error ([`Error::Canceled`] or
    /// [`Error::DeadlineExceeded`]) when it is done before the sleep elapses.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Error> {
        tokio::select! {
            () = self.token.cancelled() => Err(self.err().unwrap_or(Error::Canceled)),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
