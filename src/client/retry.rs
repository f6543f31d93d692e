//! Retry with exponential backoff and jitter.
//!
//! An operation is attempted up to `max_retries + 1` times. Only errors for
//! which [`Error::is_retryable`] holds are retried; anything else is returned
//! unchanged after the first attempt.
//!
//! | Retry | Base delay (defaults) |
//! |-------|-----------------------|
//! | 1 | 100ms |
//! | 2 | 200ms |
//! | 3 | 400ms |
//! | n | min(100ms · 2ⁿ⁻¹, 5s) |
//!
//! Each delay is scaled by a random factor in `[1 - jitter, 1 + jitter]`.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

use super::RetryPolicy;

// ============================================================================
// Retrier
// ============================================================================

/// Runs operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct Retrier {
    policy: RetryPolicy,
}

impl Retrier {
    /// Creates a retrier.
    #[inline]
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Returns the policy.
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Base delay before retry number `retry` (0-based), without jitter.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let factor = self.policy.multiplier.max(1.0).powi(exponent);
        let millis = self.policy.initial_delay.as_secs_f64() * 1000.0 * factor;
        let capped = millis.min(self.policy.max_delay.as_secs_f64() * 1000.0);
        Duration::from_secs_f64(capped.max(0.0) / 1000.0)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = self.policy.jitter;
        if jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
        delay.mul_f64(factor.max(0.0))
    }

    /// Runs `operation` until it succeeds, fails permanently, or the attempt
    /// budget is spent.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] if `cancel` fires during an attempt or a delay
    /// - [`Error::RetriesExhausted`] wrapping the last error once every attempt failed
    /// - the operation's own error if it is not retryable
    pub async fn execute<T, F, Fut>(&self, cancel: &CancellationToken, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let statuses = &self.policy.retryable_statuses;
        self.execute_if(cancel, |e| e.is_retryable(statuses), operation)
            .await
    }

    /// Like [`execute`](Self::execute), but only retries errors accepted by
    /// `should_retry`.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub async fn execute_if<T, P, F, Fut>(
        &self,
        cancel: &CancellationToken,
        should_retry: P,
        mut operation: F,
    ) -> Result<T>
    where
        P: Fn(&Error) -> bool,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_retries.saturating_add(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                outcome = operation() => outcome,
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !should_retry(&error) {
                return Err(error);
            }

            if attempt >= max_attempts {
                if attempt == 1 {
                    return Err(error);
                }
                return Err(Error::retries_exhausted(attempt, error));
            }

            let delay = self.jittered(self.delay_for(attempt - 1));
            debug!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
