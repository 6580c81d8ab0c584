//! Saga error types.

use domain::{DecodeError, StoreError};
use event_bus::{Delivery, HandlerError};
use thiserror::Error;

/// Errors that can occur while processing saga events.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The message payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A repository call failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

impl From<SagaError> for HandlerError {
    fn from(err: SagaError) -> Self {
        match err {
            SagaError::Decode(e) => HandlerError::Malformed(e.to_string()),
            SagaError::Store(e) => HandlerError::Retryable(e.to_string()),
        }
    }
}

/// Decodes a delivery into a [`domain::SagaEvent`].
pub(crate) fn decode_delivery(delivery: &Delivery) -> Result<domain::SagaEvent> {
    Ok(domain::SagaEvent::decode(&delivery.envelope.payload)?)
}
