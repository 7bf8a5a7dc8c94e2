use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use super::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState, Resilience, RetryPolicy,
    StateObserver,
};

/// Process-wide set of breakers keyed by dependency name.
///
/// Breakers are created on first use and live as long as the registry. Share
/// it through `Arc` rather than a global.
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    observer: StateObserver,
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakerRegistry {
    /// Registry whose breakers log every state transition.
    pub fn new() -> Self {
        Self::with_observer(Arc::new(log_transition))
    }

    pub fn with_observer(observer: StateObserver) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            observer,
        }
    }

    /// Existing breaker for `name`, or a new one built from `config`.
    /// `config` is ignored when the breaker already exists.
    pub fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write();
        let breaker = breakers.entry(name.to_owned()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(name, config).with_observer(Arc::clone(&self.observer)))
        });
        Arc::clone(breaker)
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Breaker for `name` paired with `retry`.
    pub fn resilience(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
        retry: RetryPolicy,
    ) -> Resilience {
        Resilience::new(self.get_or_create(name, config), retry)
    }

    /// Returns `false` if no breaker is registered under `name`.
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        let breakers: Vec<_> = self.breakers.read().values().cloned().collect();
        for breaker in breakers {
            breaker.reset();
        }
    }

    /// Snapshots of every breaker, sorted by name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self
            .breakers
            .read()
            .values()
            .map(|b| b.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// `true` when no registered breaker is rejecting calls. Open breakers
    /// past their timeout count as recovering.
    pub fn none_rejecting(&self) -> bool {
        self.breakers.read().values().all(|b| !b.is_rejecting())
    }
}

fn log_transition(name: &str, from: CircuitState, to: CircuitState) {
    match to {
        CircuitState::Open => warn!(breaker = name, %from, %to, "circuit breaker opened"),
        _ => info!(breaker = name, %from, %to, "circuit breaker state changed"),
    }
}
