//! Shared types used across the order fulfillment services.

pub mod types;

pub use types::{OrderId, PaymentId, ProductId, UserId};
