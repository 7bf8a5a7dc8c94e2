use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ResilienceError;

/// Substrings (lowercased) that mark an error as transient.
const RETRYABLE_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "broken pipe",
    "timeout",
    "timed out",
    "temporary failure",
    "502",
    "503",
    "504",
];

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Adds up to 25% random extra delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes a single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retrying after the given (1-based) failed attempt:
    /// `initial_delay * backoff_factor^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(exponent);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);
        let delay_ms = if self.jitter {
            capped_ms * (1.0 + rand::rng().random_range(0.0..0.25))
        } else {
            capped_ms
        };
        Duration::from_millis(delay_ms.max(0.0).round() as u64)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// runs out of attempts, or `cancel` fires.
    ///
    /// Cancellation is observed both while the operation runs and while
    /// sleeping between attempts.
    pub async fn run<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(ResilienceError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ResilienceError::Cancelled),
                result = operation() => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !is_retryable(&err) {
                return Err(ResilienceError::Failed(err));
            }
            if attempt >= max_attempts {
                return Err(ResilienceError::RetryExhausted {
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = self.delay_for(attempt);
            debug!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after transient error"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ResilienceError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Whether the error (or anything in its cause chain) looks transient.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    let text = format!("{err:#}").to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| text.contains(p))
}
