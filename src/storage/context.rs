//! Call context: cancellation and deadline for a single storage call

use crate::error::{KvError, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Cancellable, optionally time-bounded context passed to every storage call
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// A context driven by an existing token
    pub fn with_token(token: CancellationToken) -> Self {
        Context {
            token,
            deadline: None,
        }
    }

    /// Returns a copy of this context that also expires after `timeout`
    ///
    /// An earlier deadline already present is kept.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now().checked_add(timeout);
        self.deadline = match (self.deadline, candidate) {
            (Some(current), Some(new)) => Some(current.min(new)),
            (current, new) => current.or(new),
        };
        self
    }

    /// Derive a child context: cancelling the child leaves the parent alone,
    /// cancelling the parent cancels the child.
    pub fn child(&self) -> Self {
        Context {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context (and all of its children)
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail fast if the context is done
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(KvError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run `fut` until it completes or the context is cancelled / times out
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;

        let sleep = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(KvError::Cancelled),
            _ = sleep => Err(KvError::Cancelled),
            res = fut => res,
        }
    }
}
