//! Order status as stored and published.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseStatusError;

/// The status of an order.
///
/// ```text
/// Pending ──┬──► Paid
///           └──► Failed
/// ```
///
/// The saga overwrites the status on every outcome event, so transitions are
/// not validated here. `Cancelled` is reserved and never set by the saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Created, payment not yet decided.
    #[default]
    Pending,

    /// Payment succeeded.
    Paid,

    /// Payment failed.
    Failed,

    /// Cancelled by the customer.
    Cancelled,
}

impl OrderStatus {
    /// Returns true once a payment outcome has been recorded.
    pub fn is_settled(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "failed" => Ok(OrderStatus::Failed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(ParseStatusError {
                kind: "order",
                value: other.to_string(),
            }),
        }
    }
}
