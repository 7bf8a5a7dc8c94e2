use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use super::ResilienceError;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds and timings for one breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed that trip the breaker.
    pub max_failures: u32,
    /// Counters in Closed reset once this long passes without a failure.
    pub interval: Duration,
    /// How long the breaker stays Open before allowing a trial call.
    pub timeout: Duration,
    /// Consecutive HalfOpen successes needed to close again.
    pub success_threshold: u32,
    /// Concurrent trial calls admitted while HalfOpen.
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
            success_threshold: 2,
            half_open_max_requests: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Tighter preset for the billing provider: trips sooner, recovers slower.
    pub fn billing_provider() -> Self {
        Self {
            max_failures: 3,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(120),
            success_threshold: 2,
            half_open_max_requests: 1,
        }
    }
}

/// Called with `(name, from, to)` after every state transition.
pub type StateObserver = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Point-in-time view of a breaker, for admin endpoints and logs.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success,
    Failure,
    /// Cancelled or dropped; neither success nor failure.
    Ignored,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    /// Bumped on every transition so late results from an older state are discarded.
    generation: u64,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
    trials_in_flight: u32,
}

/// Fails fast once a dependency looks unhealthy, then admits trial calls to detect recovery.
///
/// All state sits behind one mutex. The lock is never held across an await
/// and the observer runs after the lock is released.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    observer: Option<StateObserver>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                generation: 0,
                failures: 0,
                successes: 0,
                last_failure: None,
                next_attempt: None,
                trials_in_flight: 0,
            }),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Stored state. An Open breaker whose timeout has passed still reports
    /// Open until the next call moves it to HalfOpen.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// `true` while calls are turned away without a trial. An Open breaker
    /// whose timeout has passed admits the next call, so it is not rejecting.
    pub fn is_rejecting(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == CircuitState::Open
            && inner.next_attempt.is_none_or(|at| Instant::now() < at)
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
        }
    }

    /// Time of the most recent recorded failure, if any.
    pub fn last_failure(&self) -> Option<Instant> {
        self.inner.lock().last_failure
    }

    /// Run `operation` under the breaker.
    ///
    /// Rejected with [`ResilienceError::CircuitOpen`] without invoking the
    /// operation while Open, or while HalfOpen with all trial slots taken.
    /// `Cancelled` results do not count against the breaker.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let generation = self.admit()?;
        let mut guard = CallGuard {
            breaker: self,
            generation,
            settled: false,
        };

        let result = operation().await;
        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(ResilienceError::Cancelled) => Outcome::Ignored,
            Err(_) => Outcome::Failure,
        };
        guard.settle(outcome);
        result
    }

    /// Force the breaker back to Closed with cleared counters.
    pub fn reset(&self) {
        let now = Instant::now();
        let transition = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            self.enter(&mut inner, CircuitState::Closed, now);
            inner.last_failure = None;
            (from != CircuitState::Closed).then_some((from, CircuitState::Closed))
        };
        self.notify(transition);
    }

    fn admit(&self) -> Result<u64, ResilienceError> {
        let now = Instant::now();
        let mut transition = None;
        let admitted = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => {
                    let quiet = inner
                        .last_failure
                        .is_some_and(|at| now.duration_since(at) >= self.config.interval);
                    if quiet {
                        inner.failures = 0;
                        inner.successes = 0;
                    }
                }
                CircuitState::Open => {
                    if inner.next_attempt.is_some_and(|at| now >= at) {
                        self.enter(&mut inner, CircuitState::HalfOpen, now);
                        transition = Some((CircuitState::Open, CircuitState::HalfOpen));
                    }
                }
                CircuitState::HalfOpen => {}
            }

            match inner.state {
                CircuitState::Closed => Some(inner.generation),
                CircuitState::Open => None,
                CircuitState::HalfOpen => {
                    if inner.trials_in_flight < self.config.half_open_max_requests.max(1) {
                        inner.trials_in_flight += 1;
                        Some(inner.generation)
                    } else {
                        None
                    }
                }
            }
        };
        self.notify(transition);

        admitted.ok_or_else(|| ResilienceError::CircuitOpen {
            name: self.name.clone(),
        })
    }

    fn record(&self, generation: u64, outcome: Outcome) {
        let now = Instant::now();
        let transition = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            if inner.state == CircuitState::HalfOpen {
                inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
            }

            let next = match (inner.state, outcome) {
                (_, Outcome::Ignored) | (CircuitState::Open, _) => None,
                (CircuitState::Closed, Outcome::Success) => {
                    inner.failures = 0;
                    None
                }
                (CircuitState::Closed, Outcome::Failure) => {
                    inner.failures += 1;
                    inner.last_failure = Some(now);
                    (inner.failures >= self.config.max_failures).then_some(CircuitState::Open)
                }
                (CircuitState::HalfOpen, Outcome::Success) => {
                    inner.successes += 1;
                    (inner.successes >= self.config.success_threshold)
                        .then_some(CircuitState::Closed)
                }
                (CircuitState::HalfOpen, Outcome::Failure) => {
                    inner.last_failure = Some(now);
                    Some(CircuitState::Open)
                }
            };

            next.map(|to| {
                let from = inner.state;
                self.enter(&mut inner, to, now);
                (from, to)
            })
        };
        self.notify(transition);
    }

    fn enter(&self, inner: &mut Inner, to: CircuitState, now: Instant) {
        inner.state = to;
        inner.generation += 1;
        inner.successes = 0;
        inner.trials_in_flight = 0;
        match to {
            CircuitState::Open => {
                inner.next_attempt = Some(now + self.config.timeout);
            }
            CircuitState::HalfOpen => {
                inner.next_attempt = None;
            }
            CircuitState::Closed => {
                inner.failures = 0;
                inner.next_attempt = None;
            }
        }
    }

    fn notify(&self, transition: Option<(CircuitState, CircuitState)>) {
        if let (Some((from, to)), Some(observer)) = (transition, &self.observer) {
            observer(&self.name, from, to);
        }
    }
}

/// Settles an admitted call. A future dropped mid-call settles as `Ignored`
/// so it cannot hold a HalfOpen trial slot forever.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl CallGuard<'_> {
    fn settle(&mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.record(self.generation, outcome);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record(self.generation, Outcome::Ignored);
        }
    }
}
