//! Domain error types.

use thiserror::Error;

/// Errors returned by order and payment repositories.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be mapped back to a domain value.
    #[error("Invalid row: {0}")]
    InvalidRow(#[from] ParseStatusError),

    /// The store refused the operation (used by in-memory stores to simulate
    /// an outage).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A status string that does not name a known status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} status '{value}'")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

/// A message on the saga topic that cannot be turned into a [`crate::SagaEvent`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not JSON, has no `event_type`, or lacks a field the
    /// event type requires.
    #[error("Malformed event payload: {0}")]
    Json(#[from] serde_json::Error),
}
