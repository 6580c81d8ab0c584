use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, PaymentId};
use tokio::sync::RwLock;

use super::{OrderRepository, PaymentRepository};
use crate::order::{NewOrder, Order, OrderStatus};
use crate::payment::{NewPayment, Payment};
use crate::{Result, StoreError};

#[derive(Debug, Default)]
struct OrderTable {
    rows: BTreeMap<OrderId, Order>,
    last_id: i64,
    unavailable: bool,
}

/// In-memory order store for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    table: Arc<RwLock<OrderTable>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`]
    /// until switched back.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.table.write().await.unavailable = unavailable;
    }

    /// Stores a complete order as-is, keeping its id.
    pub async fn put(&self, order: Order) {
        let mut table = self.table.write().await;
        table.last_id = table.last_id.max(order.id.as_i64());
        table.rows.insert(order.id, order);
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.read().await.rows.is_empty()
    }
}

fn unavailable() -> StoreError {
    StoreError::Unavailable("in-memory store switched off".to_string())
}

#[async_trait]
impl OrderRepository for InMemoryOrderStore {
    async fn insert(&self, order: NewOrder) -> Result<Order> {
        let mut table = self.table.write().await;
        if table.unavailable {
            return Err(unavailable());
        }

        table.last_id += 1;
        let order = order.into_order(OrderId::new(table.last_id), Utc::now());
        table.rows.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let table = self.table.read().await;
        if table.unavailable {
            return Err(unavailable());
        }
        Ok(table.rows.get(&id).cloned())
    }

    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<bool> {
        let mut table = self.table.write().await;
        if table.unavailable {
            return Err(unavailable());
        }

        match table.rows.get_mut(&id) {
            Some(order) => {
                order.status = status;
                order.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Debug, Default)]
struct PaymentTable {
    rows: BTreeMap<PaymentId, Payment>,
    last_id: i64,
    unavailable: bool,
}

/// In-memory payment store for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentStore {
    table: Arc<RwLock<PaymentTable>>,
}

impl InMemoryPaymentStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`]
    /// until switched back.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.table.write().await.unavailable = unavailable;
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.read().await.rows.is_empty()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentStore {
    async fn insert(&self, payment: NewPayment) -> Result<Payment> {
        let mut table = self.table.write().await;
        if table.unavailable {
            return Err(unavailable());
        }

        table.last_id += 1;
        let payment = payment.into_payment(PaymentId::new(table.last_id), Utc::now());
        table.rows.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        let table = self.table.read().await;
        if table.unavailable {
            return Err(unavailable());
        }
        Ok(table.rows.get(&id).cloned())
    }

    async fn find_by_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        let table = self.table.read().await;
        if table.unavailable {
            return Err(unavailable());
        }
        Ok(table
            .rows
            .values()
            .filter(|payment| payment.order_id == order_id)
            .cloned()
            .collect())
    }
}
