//! Circuit breaker and retry wrappers for outbound calls.
//!
//! [`Resilience`] runs the retry loop *inside* one breaker call, so a burst of
//! retried failures counts once toward the breaker threshold.

mod circuit_breaker;
mod registry;
mod retry;

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState, StateObserver,
};
pub use registry::BreakerRegistry;
pub use retry::{RetryPolicy, is_retryable};

/// Outcome of a guarded call that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum ResilienceError {
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },
    #[error("gave up after {attempts} attempts: {source:#}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl ResilienceError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }
}

/// A named breaker paired with a retry policy.
#[derive(Debug, Clone)]
pub struct Resilience {
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl Resilience {
    pub fn new(breaker: Arc<CircuitBreaker>, retry: RetryPolicy) -> Self {
        Self { breaker, retry }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `operation` with retries under the breaker, honouring `cancel`.
    pub async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.breaker
            .call(|| self.retry.run(cancel, operation))
            .await
    }

    /// [`execute`](Self::execute) for callers with no cancellation signal of
    /// their own; dropping the returned future still cancels the call.
    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.execute(&CancellationToken::new(), operation).await
    }
}
