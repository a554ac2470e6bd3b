//! Bounded exponential backoff for the network-facing lookup steps.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

/// Attempt budget and base delay for [`with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay; the wait after the n-th failure is `initial_delay * 2^n`.
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
        }
    }

    /// Delay before the retry that follows failed attempt number `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.initial_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Run `operation` until it succeeds, fails fatally, or the policy runs out.
///
/// Fatal errors (see [`Error::is_fatal`]) are returned as-is on first
/// occurrence. Cancelling `cancel` aborts both a running attempt and a
/// pending backoff with [`Error::Cancelled`].
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            outcome = operation() => outcome,
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => err,
        };

        attempt += 1;
        if attempt >= max_attempts {
            return Err(Error::RetryExhausted {
                attempts: attempt,
                source: Box::new(err),
            });
        }

        let delay = policy.delay_for(attempt);
        debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after failure"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
