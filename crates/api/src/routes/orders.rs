//! Order intake and lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::OrderId;
use domain::{Order, OrderRepository, Payment, PaymentRepository};
use event_bus::InMemoryEventBus;
use saga::{CreateOrderRequest, OrderIntake, ProductCatalog};

use crate::error::ApiError;

pub type SharedCatalog = Arc<dyn ProductCatalog>;
pub type SharedOrders = Arc<dyn OrderRepository>;
pub type SharedPayments = Arc<dyn PaymentRepository>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub intake: OrderIntake<SharedCatalog, SharedOrders, InMemoryEventBus>,
    pub orders: SharedOrders,
    pub payments: SharedPayments,
}

/// POST /orders: validate, price and store a pending order.
#[tracing::instrument(skip(state, req), fields(user_id = %req.user_id))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state.intake.create_order(req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .orders
        .get(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))?;
    Ok(Json(order))
}

/// GET /orders/{id}/payments: payments recorded for an order, oldest first.
#[tracing::instrument(skip(state))]
pub async fn payments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Payment>>, ApiError> {
    let order_id = parse_order_id(&id)?;
    if state.orders.get(order_id).await?.is_none() {
        return Err(ApiError::NotFound("Order not found".to_string()));
    }
    let payments = state.payments.find_by_order(order_id).await?;
    Ok(Json(payments))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse::<i64>()
        .map(OrderId::new)
        .map_err(|_| ApiError::BadRequest("Invalid order ID".to_string()))
}
