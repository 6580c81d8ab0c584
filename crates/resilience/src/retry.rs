//! Bounded retry with linearly increasing backoff.
//!
//! Used for best-effort side effects whose failure must not be pushed back to
//! the message bus: the caller blocks through every backoff and receives
//! either the first success or the last error.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Retry policy: `max_retries` additional attempts after the first, waiting
/// `attempt * base_interval` after failed attempt number `attempt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    /// Attempts made after the initial one.
    pub max_retries: u32,
    /// Delay unit multiplied by the attempt number.
    pub base_interval: Duration,
}

impl LinearBackoff {
    /// Creates a policy.
    pub fn new(max_retries: u32, base_interval: Duration) -> Self {
        Self {
            max_retries,
            base_interval,
        }
    }

    /// Total number of attempts the policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_interval.saturating_mul(attempt)
    }
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_interval: Duration::from_secs(1),
        }
    }
}

/// Returned when every attempt failed.
#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempts: {last_error}")]
pub struct RetryError<E> {
    /// Name of the retried operation, for logs.
    pub operation: String,
    /// Number of attempts made.
    pub attempts: u32,
    /// Error returned by the final attempt.
    pub last_error: E,
}

/// Runs `operation` until it succeeds or the policy is exhausted.
///
/// `operation` receives the 1-based attempt number.
///
/// # Errors
///
/// Returns [`RetryError`] carrying the last failure once
/// `policy.max_attempts()` attempts have failed.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: LinearBackoff,
    operation_name: &str,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts => {
                let backoff = policy.delay_after(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => {
                return Err(RetryError {
                    operation: operation_name.to_string(),
                    attempts: attempt,
                    last_error: err,
                });
            }
        }
    }
}
