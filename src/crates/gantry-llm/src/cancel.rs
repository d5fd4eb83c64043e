//! Cancellation tokens and the abort/timeout composition.
//!
//! A [`CancellationToken`] is a cheaply clonable flag that can be tripped
//! once. [`run_bounded`] composes an optional token with an optional total
//! timeout around a future using a single observe-once-then-settle race:
//! a pre-aborted token wins over a configured timer, a timer win raises
//! [`LlmError::RequestTimeout`], a signal win raises [`LlmError::Aborted`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{LlmError, Result};

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A one-shot cancellation flag shared between a caller and the work it
/// wants to be able to stop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve when the token is tripped. Resolves immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        loop {
            // Interest must be registered before the flag check, or a
            // cancel between check and await is a lost wakeup.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Run a future bounded by an optional abort signal and an optional total
/// timeout.
pub async fn run_bounded<F, T>(
    signal: Option<&CancellationToken>,
    total: Option<Duration>,
    future: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    // A signal that tripped before the race starts wins outright, even
    // when a timeout is configured.
    if let Some(token) = signal {
        if token.is_cancelled() {
            return Err(LlmError::Aborted);
        }
    }

    match (signal, total) {
        (None, None) => future.await,
        (Some(token), None) => {
            tokio::select! {
                result = future => result,
                _ = token.cancelled() => Err(LlmError::Aborted),
            }
        }
        (None, Some(limit)) => {
            tokio::select! {
                result = future => result,
                _ = tokio::time::sleep(limit) => Err(LlmError::RequestTimeout(limit)),
            }
        }
        (Some(token), Some(limit)) => {
            tokio::select! {
                result = future => result,
                _ = token.cancelled() => Err(LlmError::Aborted),
                _ = tokio::time::sleep(limit) => Err(LlmError::RequestTimeout(limit)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn never() -> Result<()> {
        futures::future::pending::<()>().await;
        Ok(())
    }

    #[tokio::test]
    async fn completes_when_nothing_fires() {
        let token = CancellationToken::new();
        let result = run_bounded(Some(&token), Some(Duration::from_secs(5)), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn pre_aborted_signal_beats_timeout() {
        let token = CancellationToken::new();
        token.cancel();
        let result = run_bounded(Some(&token), Some(Duration::from_millis(1)), never()).await;
        assert!(matches!(result, Err(LlmError::Aborted)));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_expiry_raises_timeout() {
        let result = run_bounded(None, Some(Duration::from_millis(50)), never()).await;
        assert!(matches!(result, Err(LlmError::RequestTimeout(_))));
    }

    #[tokio::test]
    async fn late_cancel_aborts_in_flight_work() {
        let token = CancellationToken::new();
        let trip = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trip.cancel();
        });
        let result = run_bounded(Some(&token), None, never()).await;
        assert!(matches!(result, Err(LlmError::Aborted)));
    }
}
