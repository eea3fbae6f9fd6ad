//! Cooperative cancellation shared by every task in a run.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// One-shot cancellation flag observed by the orchestrator, tasks and
/// backends. Once triggered it stays triggered.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    token: CancellationToken,
}

impl CancellationSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal is triggered.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// A signal that is cancelled with this one but can also be cancelled on
    /// its own without affecting the parent.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Return `TaskError::Cancelled` when the signal is set.
    pub fn check(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Trigger the signal after `delay` unless it fires first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn cancel_after(&self, delay: Duration) -> JoinHandle<()> {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {
                    tracing::debug!(delay_ms = delay.as_millis() as u64, "deadline reached, cancelling run");
                    token.cancel();
                }
                () = token.cancelled() => {}
            }
        })
    }

    /// Access the underlying token, e.g. for `tokio::select!` in backends.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}
