//! Payments recorded by the payment service.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::ParseStatusError;

/// Outcome of a payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Success,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    /// Returns true for outcomes that are never revisited.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "success" => Ok(PaymentStatus::Success),
            "failed" => Ok(PaymentStatus::Failed),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(ParseStatusError {
                kind: "payment",
                value: other.to_string(),
            }),
        }
    }
}

/// A persisted payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: f64,
    pub status: PaymentStatus,
    /// Set only for successful payments; empty otherwise.
    pub transaction_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when inserting a payment.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: f64,
    pub status: PaymentStatus,
    pub transaction_id: String,
}

impl NewPayment {
    pub fn into_payment(self, id: PaymentId, now: DateTime<Utc>) -> Payment {
        Payment {
            id,
            order_id: self.order_id,
            user_id: self.user_id,
            amount: self.amount,
            status: self.status,
            transaction_id: self.transaction_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Builds the processor reference for a successful payment:
/// `TXN-<order id>-<unix nanoseconds>`.
pub fn transaction_id(order_id: OrderId, at: DateTime<Utc>) -> String {
    let nanos = at
        .timestamp_nanos_opt()
        .unwrap_or_else(|| at.timestamp_micros().saturating_mul(1_000));
    format!("TXN-{order_id}-{nanos}")
}
