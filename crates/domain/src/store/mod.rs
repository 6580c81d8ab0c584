//! Persistence for orders and payments.

mod memory;
mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, PaymentId};

use crate::Result;
use crate::order::{NewOrder, Order, OrderStatus};
use crate::payment::{NewPayment, Payment};

pub use memory::{InMemoryOrderStore, InMemoryPaymentStore};
pub use postgres::{PostgresOrderStore, PostgresPaymentStore, run_migrations};

/// Storage for orders.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Inserts a pending order and returns it with its assigned id.
    async fn insert(&self, order: NewOrder) -> Result<Order>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>>;

    /// Overwrites the status and refreshes `updated_at`.
    ///
    /// Returns `false` when no order has the id.
    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<bool>;
}

/// Storage for payments.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Inserts a payment and returns it with its assigned id.
    async fn insert(&self, payment: NewPayment) -> Result<Payment>;

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>>;

    /// Payments recorded for an order, oldest first.
    async fn find_by_order(&self, order_id: OrderId) -> Result<Vec<Payment>>;
}

#[async_trait]
impl<R: OrderRepository + ?Sized> OrderRepository for Arc<R> {
    async fn insert(&self, order: NewOrder) -> Result<Order> {
        (**self).insert(order).await
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        (**self).get(id).await
    }

    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<bool> {
        (**self).update_status(id, status).await
    }
}

#[async_trait]
impl<R: PaymentRepository + ?Sized> PaymentRepository for Arc<R> {
    async fn insert(&self, payment: NewPayment) -> Result<Payment> {
        (**self).insert(payment).await
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        (**self).get(id).await
    }

    async fn find_by_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        (**self).find_by_order(order_id).await
    }
}
