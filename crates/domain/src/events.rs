//! Events exchanged on the order topic.
//!
//! Every message is a flat JSON object with an `event_type` discriminator.
//! Order events and payment events share the topic; [`SagaEvent::decode`]
//! picks the shape from the discriminator and keeps unrecognised types as
//! [`SagaEvent::Unknown`] so consumers can skip them.

use common::{OrderId, PaymentId, ProductId, UserId};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::DecodeError;
use crate::order::{Order, OrderStatus};
use crate::payment::{Payment, PaymentStatus};

/// Known `event_type` values.
pub mod event_types {
    pub const ORDER_CREATED: &str = "order_created";
    pub const ORDER_PAID: &str = "order_paid";
    pub const ORDER_FAILED: &str = "order_failed";
    pub const PAYMENT_SUCCESS: &str = "payment_success";
    pub const PAYMENT_FAILED: &str = "payment_failed";
}

/// Published by the order side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: i32,
    #[serde(default, deserialize_with = "lenient_order_status")]
    pub status: OrderStatus,
    pub total_price: f64,
    pub event_type: String,
}

impl OrderEvent {
    /// The `order_created` event for a freshly inserted order.
    pub fn created(order: &Order) -> Self {
        Self {
            order_id: order.id,
            user_id: order.user_id,
            product_id: order.product_id,
            quantity: order.quantity,
            status: order.status,
            total_price: order.total_price,
            event_type: event_types::ORDER_CREATED.to_string(),
        }
    }
}

/// Published by the payment side once a payment is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: f64,
    pub status: PaymentStatus,
    pub event_type: String,
    #[serde(default)]
    pub transaction_id: String,
}

impl PaymentEvent {
    /// The outcome event for a recorded payment: `payment_success` for a
    /// successful payment, `payment_failed` otherwise.
    pub fn outcome(payment: &Payment) -> Self {
        let event_type = if payment.status == PaymentStatus::Success {
            event_types::PAYMENT_SUCCESS
        } else {
            event_types::PAYMENT_FAILED
        };
        Self {
            payment_id: payment.id,
            order_id: payment.order_id,
            user_id: payment.user_id,
            amount: payment.amount,
            status: payment.status,
            event_type: event_type.to_string(),
            transaction_id: payment.transaction_id.clone(),
        }
    }
}

// An unrecognised status string reads as the default instead of failing the
// whole event.
fn lenient_order_status<'de, D>(deserializer: D) -> Result<OrderStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.parse().ok()).unwrap_or_default())
}

/// A payment outcome as read by downstream consumers.
///
/// Outcomes arrive in the [`PaymentEvent`] shape and in the [`OrderEvent`]
/// shape, so only `order_id` is required. `status` is not read: the
/// `event_type` already says what happened.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PaymentOutcome {
    pub order_id: OrderId,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub payment_id: Option<PaymentId>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub transaction_id: String,
}

impl From<PaymentEvent> for PaymentOutcome {
    fn from(event: PaymentEvent) -> Self {
        Self {
            order_id: event.order_id,
            user_id: Some(event.user_id),
            payment_id: Some(event.payment_id),
            amount: Some(event.amount),
            transaction_id: event.transaction_id,
        }
    }
}

/// A decoded message from the order topic.
#[derive(Debug, Clone, PartialEq)]
pub enum SagaEvent {
    OrderCreated(OrderEvent),
    OrderPaid(OrderEvent),
    OrderFailed(OrderEvent),
    PaymentSuccess(PaymentOutcome),
    PaymentFailed(PaymentOutcome),
    /// A well-formed message of a type this service does not handle.
    Unknown { event_type: String },
}

#[derive(Deserialize)]
struct Discriminator {
    event_type: String,
}

impl SagaEvent {
    /// Decodes a JSON payload.
    ///
    /// Unknown JSON keys are ignored. Unknown event types decode to
    /// [`SagaEvent::Unknown`]. Payment outcomes only need an `order_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the payload is not a JSON object with a
    /// string `event_type`, or when a known event type is missing a required
    /// field.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let Discriminator { event_type } = serde_json::from_slice(payload)?;
        let event = match event_type.as_str() {
            event_types::ORDER_CREATED => Self::OrderCreated(serde_json::from_slice(payload)?),
            event_types::ORDER_PAID => Self::OrderPaid(serde_json::from_slice(payload)?),
            event_types::ORDER_FAILED => Self::OrderFailed(serde_json::from_slice(payload)?),
            event_types::PAYMENT_SUCCESS => Self::PaymentSuccess(serde_json::from_slice(payload)?),
            event_types::PAYMENT_FAILED => Self::PaymentFailed(serde_json::from_slice(payload)?),
            _ => Self::Unknown { event_type },
        };
        Ok(event)
    }

    /// The `event_type` discriminator.
    pub fn event_type(&self) -> &str {
        match self {
            Self::OrderCreated(_) => event_types::ORDER_CREATED,
            Self::OrderPaid(_) => event_types::ORDER_PAID,
            Self::OrderFailed(_) => event_types::ORDER_FAILED,
            Self::PaymentSuccess(_) => event_types::PAYMENT_SUCCESS,
            Self::PaymentFailed(_) => event_types::PAYMENT_FAILED,
            Self::Unknown { event_type } => event_type,
        }
    }

    /// Order the event refers to, if it is a known type.
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            Self::OrderCreated(e) | Self::OrderPaid(e) | Self::OrderFailed(e) => Some(e.order_id),
            Self::PaymentSuccess(e) | Self::PaymentFailed(e) => Some(e.order_id),
            Self::Unknown { .. } => None,
        }
    }
}
