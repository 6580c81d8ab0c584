//! Order fulfillment service.
//!
//! Runs the synchronous order intake behind an HTTP API and the three saga
//! consumers (`payment-service`, `order-service`, `notification-service`)
//! on the in-process event bus.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use common::ProductId;
use event_bus::{Consumer, ConsumerStats, EventBus, InMemoryEventBus};
use resilience::CircuitBreaker;
use saga::{
    GuardedCatalog, InMemoryCatalog, NotificationDispatcher, Notifier, OrderIntake,
    OrderSagaStateMachine, PaymentDecisionEngine, PaymentProcessor, Product,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::orders::{AppState, SharedCatalog, SharedOrders, SharedPayments};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/payments", get(routes::orders::payments))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state: order intake guarded by a fresh catalog
/// circuit breaker, plus read access to the stores.
pub fn create_state(
    config: &Config,
    catalog: SharedCatalog,
    orders: SharedOrders,
    payments: SharedPayments,
    bus: InMemoryEventBus,
) -> Arc<AppState> {
    let guarded = GuardedCatalog::new(
        catalog,
        CircuitBreaker::new("product-catalog", config.breaker_config()),
        config.catalog_timeout,
    );
    Arc::new(AppState {
        intake: OrderIntake::new(guarded, orders.clone(), bus, config.topic.clone()),
        orders,
        payments,
    })
}

/// Handle to a running consumer task.
pub type ConsumerTask = JoinHandle<event_bus::Result<ConsumerStats>>;

/// Subscribes the three saga services to the order topic and starts them.
///
/// Each service uses its own consumer group, so every one of them sees every
/// event.
///
/// # Errors
///
/// Returns an error if a subscription cannot be created.
pub async fn spawn_consumers<N>(
    config: &Config,
    bus: &InMemoryEventBus,
    orders: SharedOrders,
    payments: SharedPayments,
    notifier: N,
    shutdown: watch::Receiver<bool>,
) -> event_bus::Result<Vec<ConsumerTask>>
where
    N: Notifier + 'static,
{
    let consumer_config = config.consumer_config();

    let payment = PaymentProcessor::new(
        PaymentDecisionEngine::new(config.payment_config()),
        payments,
        bus.clone(),
        config.topic.clone(),
    );
    let order_saga = OrderSagaStateMachine::new(orders);
    let notifications = NotificationDispatcher::new(notifier, config.notification_config());

    let payment_sub = bus.subscribe(&config.topic, "payment-service").await?;
    let order_sub = bus.subscribe(&config.topic, "order-service").await?;
    let notification_sub = bus.subscribe(&config.topic, "notification-service").await?;

    Ok(vec![
        Consumer::new(payment_sub, payment, consumer_config).spawn(shutdown.clone()),
        Consumer::new(order_sub, order_saga, consumer_config).spawn(shutdown.clone()),
        Consumer::new(notification_sub, notifications, consumer_config).spawn(shutdown),
    ])
}

/// A small catalog for local runs without a product service.
pub fn demo_catalog() -> InMemoryCatalog {
    InMemoryCatalog::with_products([
        Product {
            id: ProductId::new(1),
            name: "Laptop".to_string(),
            price: 999.99,
            stock: 50,
        },
        Product {
            id: ProductId::new(2),
            name: "Mouse".to_string(),
            price: 29.99,
            stock: 200,
        },
        Product {
            id: ProductId::new(3),
            name: "Keyboard".to_string(),
            price: 79.99,
            stock: 150,
        },
    ])
}
