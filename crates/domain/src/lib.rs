//! Domain model for order fulfillment.
//!
//! This crate provides:
//! - [`Order`] and [`Payment`] records with their status enums
//! - [`SagaEvent`], the typed view of messages on the order topic
//! - [`OrderRepository`] / [`PaymentRepository`] with in-memory and
//!   PostgreSQL implementations

pub mod error;
pub mod events;
pub mod order;
pub mod payment;
pub mod store;

pub use error::{DecodeError, ParseStatusError, Result, StoreError};
pub use events::{OrderEvent, PaymentEvent, PaymentOutcome, SagaEvent, event_types};
pub use order::{NewOrder, Order, OrderStatus};
pub use payment::{NewPayment, Payment, PaymentStatus, transaction_id};
pub use store::{
    InMemoryOrderStore, InMemoryPaymentStore, OrderRepository, PaymentRepository,
    PostgresOrderStore, PostgresPaymentStore, run_migrations,
};
