use async_trait::async_trait;
use common::{OrderId, PaymentId, ProductId, UserId};
use sqlx::{PgPool, Row, postgres::PgRow};

use super::{OrderRepository, PaymentRepository};
use crate::Result;
use crate::order::{NewOrder, Order, OrderStatus};
use crate::payment::{NewPayment, Payment, PaymentStatus};

/// Runs the database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    tracing::info!("database migrations applied");
    Ok(())
}

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        Ok(Order {
            id: OrderId::new(row.try_get("id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            product_id: ProductId::new(row.try_get("product_id")?),
            quantity: row.try_get("quantity")?,
            status: status.parse()?,
            total_price: row.try_get("total_price")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderStore {
    async fn insert(&self, order: NewOrder) -> Result<Order> {
        let row = sqlx::query(
            r#"
            INSERT INTO orders (user_id, product_id, quantity, status, total_price)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, product_id, quantity, status, total_price, created_at, updated_at
            "#,
        )
        .bind(order.user_id.as_i64())
        .bind(order.product_id.as_i64())
        .bind(order.quantity)
        .bind(OrderStatus::Pending.as_str())
        .bind(order.total_price)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_order(row)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, product_id, quantity, status, total_price, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn update_status(&self, id: OrderId, status: OrderStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE orders SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(status.as_str())
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// PostgreSQL-backed payment store.
#[derive(Clone)]
pub struct PostgresPaymentStore {
    pool: PgPool,
}

impl PostgresPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let status: String = row.try_get("status")?;
        Ok(Payment {
            id: PaymentId::new(row.try_get("id")?),
            order_id: OrderId::new(row.try_get("order_id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            amount: row.try_get("amount")?,
            status: status.parse::<PaymentStatus>()?,
            transaction_id: row.try_get("transaction_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl PaymentRepository for PostgresPaymentStore {
    async fn insert(&self, payment: NewPayment) -> Result<Payment> {
        let row = sqlx::query(
            r#"
            INSERT INTO payments (order_id, user_id, amount, status, transaction_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, order_id, user_id, amount, status, transaction_id, created_at, updated_at
            "#,
        )
        .bind(payment.order_id.as_i64())
        .bind(payment.user_id.as_i64())
        .bind(payment.amount)
        .bind(payment.status.as_str())
        .bind(&payment.transaction_id)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_payment(row)
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        let row = sqlx::query(
            r#"
            SELECT id, order_id, user_id, amount, status, transaction_id, created_at, updated_at
            FROM payments
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn find_by_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, user_id, amount, status, transaction_id, created_at, updated_at
            FROM payments
            WHERE order_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(order_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_payment).collect()
    }
}
