//! Circuit breaker guarding calls to a single dependency.
//!
//! # States
//!
//! ```text
//! Closed ──(max_failures)──► Open ──(reset_timeout elapsed)──► HalfOpen
//!   ▲                          ▲                                  │
//!   │                          └──────────(probe fails)───────────┤
//!   └──────────────────────────(probe succeeds)───────────────────┘
//! ```
//!
//! The check, the wrapped call and the state update form a single critical
//! section: callers sharing a breaker are serialized for the whole duration of
//! the wrapped operation, so operations must carry their own timeout.

use std::future::Future;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// The observable state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BreakerState {
    /// Calls pass through; failures are counted.
    #[default]
    Closed,

    /// Calls fail immediately until the reset timeout elapses.
    Open,

    /// The next call probes the dependency.
    HalfOpen,
}

impl BreakerState {
    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::Open => 1,
            BreakerState::HalfOpen => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Construction parameters for a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub max_failures: u32,
    /// How long the circuit stays open before a probe is allowed.
    pub reset_timeout: Duration,
}

impl CircuitBreakerConfig {
    /// Creates a configuration from its two parameters.
    pub fn new(max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            max_failures,
            reset_timeout,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Errors returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// The circuit is open; the operation was not invoked.
    #[error("Circuit breaker for '{dependency}' is open")]
    Open { dependency: String },

    /// The operation ran and failed. The failure was counted.
    #[error("Dependency call failed: {0}")]
    Dependency(E),
}

impl<E> CircuitBreakerError<E> {
    /// Returns true if the call was rejected without being invoked.
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }

    /// Returns the operation's own error, if the operation ran.
    pub fn into_dependency_error(self) -> Option<E> {
        match self {
            CircuitBreakerError::Dependency(e) => Some(e),
            CircuitBreakerError::Open { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

/// Failure guard for one dependency.
///
/// A breaker is constructed explicitly by the component that owns the
/// dependency and shared by reference with every call site for it.
#[derive(Debug)]
pub struct CircuitBreaker {
    dependency: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    // Mirrors of the locked state so observers never wait on an in-flight call.
    observed_state: AtomicU8,
    observed_failures: AtomicU32,
}

impl CircuitBreaker {
    /// Creates a closed breaker for the named dependency.
    pub fn new(dependency: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            inner: Mutex::new(BreakerInner::default()),
            observed_state: AtomicU8::new(BreakerState::Closed.to_u8()),
            observed_failures: AtomicU32::new(0),
        }
    }

    /// Returns the name of the guarded dependency.
    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Returns the current state without mutating it.
    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.observed_state.load(Ordering::Acquire))
    }

    /// Returns the number of failures counted since the last reset.
    pub fn failure_count(&self) -> u32 {
        self.observed_failures.load(Ordering::Acquire)
    }

    /// Runs `operation` through the breaker.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitBreakerError::Open`] without invoking `operation` while
    /// the circuit is open, or [`CircuitBreakerError::Dependency`] carrying the
    /// operation's error when it fails.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut inner = self.inner.lock().await;

        if inner.state == BreakerState::Open {
            let timeout_elapsed = inner
                .last_failure_at
                .is_none_or(|at| at.elapsed() > self.config.reset_timeout);

            if !timeout_elapsed {
                metrics::counter!(
                    "circuit_breaker_rejections_total",
                    "dependency" => self.dependency.clone()
                )
                .increment(1);
                tracing::debug!(dependency = %self.dependency, "circuit open, rejecting call");
                return Err(CircuitBreakerError::Open {
                    dependency: self.dependency.clone(),
                });
            }

            tracing::info!(dependency = %self.dependency, "circuit half-open, probing dependency");
            inner.state = BreakerState::HalfOpen;
            inner.failure_count = 0;
            self.publish(&inner);
        }

        match operation().await {
            Ok(value) => {
                if inner.state == BreakerState::HalfOpen {
                    tracing::info!(
                        dependency = %self.dependency,
                        "probe succeeded, circuit closed"
                    );
                    inner.state = BreakerState::Closed;
                }
                inner.failure_count = 0;
                self.publish(&inner);
                Ok(value)
            }
            Err(err) => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.last_failure_at = Some(Instant::now());

                let previous = inner.state;
                if inner.failure_count >= self.config.max_failures
                    || previous == BreakerState::HalfOpen
                {
                    inner.state = BreakerState::Open;
                }

                if previous != BreakerState::Open && inner.state == BreakerState::Open {
                    metrics::counter!(
                        "circuit_breaker_opened_total",
                        "dependency" => self.dependency.clone()
                    )
                    .increment(1);
                    tracing::warn!(
                        dependency = %self.dependency,
                        failures = inner.failure_count,
                        from = %previous,
                        "circuit opened"
                    );
                }

                self.publish(&inner);
                Err(CircuitBreakerError::Dependency(err))
            }
        }
    }

    fn publish(&self, inner: &BreakerInner) {
        self.observed_state
            .store(inner.state.to_u8(), Ordering::Release);
        self.observed_failures
            .store(inner.failure_count, Ordering::Release);
    }
}
