//! Cancellation Token
//!
//! Observable cancellation flag handed from the scheduler to a task body.

use tokio_util::sync::CancellationToken as SignalToken;

/// Cancellation signal for one scheduled task
///
/// Task bodies can poll [`is_cancelled`](Self::is_cancelled) or await
/// [`cancelled`](Self::cancelled); only the scheduler can raise the signal.
/// Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    inner: SignalToken,
}

impl CancellationToken {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether cancellation has been requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolve once cancellation is requested
    ///
    /// Completes immediately if the token is already cancelled.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }

    /// Raise the signal. Idempotent.
    pub(crate) fn cancel(&self) {
        self.inner.cancel();
    }
}
