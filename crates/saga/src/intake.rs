//! Synchronous order intake: validate, price, persist and start the saga.

use common::{ProductId, UserId};
use domain::{NewOrder, Order, OrderEvent, OrderRepository, StoreError};
use event_bus::{EventBus, EventBusExt, TraceContext};
use resilience::CircuitBreakerError;
use serde::Deserialize;
use thiserror::Error;

use crate::catalog::{CatalogError, GuardedCatalog, GuardedError, ProductCatalog};

/// Request body for creating an order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: i32,
}

/// Reasons an order is not accepted.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Quantity must be positive, got {0}")]
    InvalidQuantity(i32),

    #[error("Product not available")]
    ProductUnavailable {
        product_id: ProductId,
        requested: i32,
        stock: i32,
    },

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The catalog failed, timed out, or its circuit is open.
    #[error("Product service unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<GuardedError> for IntakeError {
    fn from(err: GuardedError) -> Self {
        match err {
            CircuitBreakerError::Dependency(CatalogError::NotFound(id)) => {
                IntakeError::ProductNotFound(id)
            }
            other => IntakeError::DependencyUnavailable(other.to_string()),
        }
    }
}

/// Accepts orders and publishes `order_created`.
pub struct OrderIntake<C, O, B> {
    catalog: GuardedCatalog<C>,
    orders: O,
    bus: B,
    topic: String,
}

impl<C, O, B> OrderIntake<C, O, B>
where
    C: ProductCatalog,
    O: OrderRepository,
    B: EventBus,
{
    pub fn new(catalog: GuardedCatalog<C>, orders: O, bus: B, topic: impl Into<String>) -> Self {
        Self {
            catalog,
            orders,
            bus,
            topic: topic.into(),
        }
    }

    pub fn catalog(&self) -> &GuardedCatalog<C> {
        &self.catalog
    }

    /// Creates a pending order priced from the catalog.
    ///
    /// The order is stored before `order_created` is published. A failed
    /// publish is logged and the order is still returned.
    ///
    /// # Errors
    ///
    /// Returns [`IntakeError`] for a non-positive quantity, missing stock, an
    /// unknown product, an unreachable catalog or a failed insert.
    #[tracing::instrument(
        skip(self, request),
        fields(
            user_id = %request.user_id,
            product_id = %request.product_id,
            quantity = request.quantity
        )
    )]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Order, IntakeError> {
        if request.quantity <= 0 {
            return Err(IntakeError::InvalidQuantity(request.quantity));
        }

        let availability = self
            .catalog
            .check_availability(request.product_id, request.quantity)
            .await
            .inspect_err(|err| tracing::error!(error = %err, "availability check failed"))?;
        if !availability.available {
            return Err(IntakeError::ProductUnavailable {
                product_id: request.product_id,
                requested: request.quantity,
                stock: availability.stock,
            });
        }

        let product = self
            .catalog
            .get_product(request.product_id)
            .await
            .inspect_err(|err| tracing::error!(error = %err, "product lookup failed"))?;

        let order = self
            .orders
            .insert(NewOrder {
                user_id: request.user_id,
                product_id: request.product_id,
                quantity: request.quantity,
                total_price: f64::from(request.quantity) * product.price,
            })
            .await?;

        let trace = TraceContext::current_or_root();
        let key = order.id.to_string();
        if let Err(err) = self
            .bus
            .publish_json(&self.topic, Some(&key), &OrderEvent::created(&order), &trace)
            .await
        {
            tracing::error!(order_id = %order.id, error = %err, "failed to publish order_created");
        }

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(
            order_id = %order.id,
            total_price = order.total_price,
            trace_id = %trace.trace_id_hex(),
            "order created"
        );
        Ok(order)
    }
}
