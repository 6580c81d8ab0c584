//! Resilience primitives for calls that cross a service boundary.
//!
//! - [`CircuitBreaker`] fails fast once a dependency keeps failing and probes
//!   it again after a reset timeout.
//! - [`retry_with_backoff`] retries a best-effort operation a bounded number of
//!   times with linearly increasing delays.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
pub use retry::{LinearBackoff, RetryError, retry_with_backoff};
