//! Orders placed by customers.

mod status;

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

pub use status::OrderStatus;

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: i32,
    pub status: OrderStatus,
    pub total_price: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when inserting an order. The store assigns the id and
/// timestamps; the status starts as [`OrderStatus::Pending`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: i32,
    pub total_price: f64,
}

impl NewOrder {
    /// Materializes the order with the given id and creation time.
    pub fn into_order(self, id: OrderId, now: DateTime<Utc>) -> Order {
        Order {
            id,
            user_id: self.user_id,
            product_id: self.product_id,
            quantity: self.quantity,
            status: OrderStatus::Pending,
            total_price: self.total_price,
            created_at: now,
            updated_at: now,
        }
    }
}
