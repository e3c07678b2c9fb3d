//! Caller-side cancellation and deadline for a single call.

use crate::error::HttpError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation handle plus optional deadline, passed to
/// [`Session::execute`](crate::Session::execute).
///
/// Cloning shares the cancellation token, so canceling any clone aborts
/// every call using it.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never canceled and has no deadline
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Use an existing cancellation token
    #[must_use]
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// A context whose deadline is `timeout` from now
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline(Instant::now() + timeout)
    }

    /// Set the deadline, keeping the earlier one if already set
    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Derive a context that is canceled with this one but can also be canceled on its own
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn deadline_at(&self) -> Option<Instant> {
        self.deadline
    }

    /// Run `fut` until it completes or the call is interrupted.
    ///
    /// Cancellation wins over the deadline, the deadline wins over the call
    /// timeout. `timeout` pairs the absolute end of the per-call timeout with
    /// its configured length; `None` disables it. `started` is used to report
    /// how long the call ran before the deadline hit.
    pub(crate) async fn guard<F: Future>(
        &self,
        started: Instant,
        timeout: Option<(Instant, Duration)>,
        fut: F,
    ) -> Result<F::Output, HttpError> {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        let timeout_elapsed = async {
            match timeout {
                Some((at, _)) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(HttpError::Canceled),
            () = deadline => Err(HttpError::DeadlineExceeded(
                self.deadline.map_or(Duration::ZERO, |at| at.saturating_duration_since(started)),
            )),
            () = timeout_elapsed => Err(HttpError::Timeout(
                timeout.map_or(Duration::ZERO, |(_, d)| d),
            )),
            out = fut => Ok(out),
        }
    }
}
