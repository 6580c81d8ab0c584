//! Choreographed order-fulfillment saga.
//!
//! Services coordinate only through events on a shared topic:
//!
//! 1. [`OrderIntake`] stores a pending order and publishes `order_created`.
//! 2. [`PaymentProcessor`] charges the order and publishes `payment_success`
//!    or `payment_failed`.
//! 3. [`OrderSagaStateMachine`] moves the order to `paid` or `failed`.
//! 4. [`NotificationDispatcher`] tells the customer at each step.
//!
//! Each consumer is an [`event_bus::EventHandler`] and runs in its own
//! consumer group, so every service sees every event.

pub mod catalog;
pub mod error;
pub mod intake;
pub mod notification;
pub mod order_saga;
pub mod payment;

pub use catalog::{
    Availability, CatalogError, GuardedCatalog, GuardedError, InMemoryCatalog, Product,
    ProductCatalog,
};
pub use error::{Result, SagaError};
pub use intake::{CreateOrderRequest, IntakeError, OrderIntake};
pub use notification::{
    DeliveryError, InMemoryNotifier, LogNotifier, Notification, NotificationConfig,
    NotificationDispatcher, Notifier,
};
pub use order_saga::{OrderSagaStateMachine, transition_for};
pub use payment::{
    PaymentConfig, PaymentDecision, PaymentDecisionEngine, PaymentProcessor,
    REASON_DECLINED, REASON_INVALID_AMOUNT,
};
