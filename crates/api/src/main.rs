//! Service entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::routes::orders::{SharedCatalog, SharedOrders, SharedPayments};
use domain::{
    InMemoryOrderStore, InMemoryPaymentStore, PostgresOrderStore, PostgresPaymentStore,
    run_migrations,
};
use event_bus::InMemoryEventBus;
use opentelemetry::trace::TracerProvider as _;
use saga::LogNotifier;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the tracing subscriber.
///
/// Spans carry OpenTelemetry contexts so trace ids can be propagated through
/// event headers. Nothing is exported.
fn init_tracing(config: &Config) -> opentelemetry_sdk::trace::TracerProvider {
    let provider = opentelemetry_sdk::trace::TracerProvider::builder().build();
    let tracer = provider.tracer("order-fulfillment");
    let json = config.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .init();

    provider
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn open_stores(config: &Config) -> (SharedOrders, SharedPayments) {
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to PostgreSQL");
            run_migrations(&pool)
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL stores");
            (
                Arc::new(PostgresOrderStore::new(pool.clone())),
                Arc::new(PostgresPaymentStore::new(pool)),
            )
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores");
            (
                Arc::new(InMemoryOrderStore::new()),
                Arc::new(InMemoryPaymentStore::new()),
            )
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    let provider = init_tracing(&config);

    let (orders, payments) = open_stores(&config).await;
    let bus = InMemoryEventBus::with_config(config.bus_config());
    let catalog: SharedCatalog = Arc::new(api::demo_catalog());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumers = api::spawn_consumers(
        &config,
        &bus,
        orders.clone(),
        payments.clone(),
        LogNotifier,
        shutdown_rx,
    )
    .await
    .expect("failed to start consumers");

    let state = api::create_state(&config, catalog, orders, payments, bus.clone());
    let app = api::create_app(state);

    let addr = config.addr();
    tracing::info!(%addr, topic = %config.topic, "starting order service");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // In-flight messages are finished and committed before the tasks return.
    let _ = shutdown_tx.send(true);
    for consumer in consumers {
        match consumer.await {
            Ok(Ok(stats)) => tracing::debug!(?stats, "consumer finished"),
            Ok(Err(err)) => tracing::error!(error = %err, "consumer failed"),
            Err(err) => tracing::error!(error = %err, "consumer task panicked"),
        }
    }
    bus.close();

    if let Err(err) = provider.shutdown() {
        tracing::warn!(error = %err, "tracer provider shutdown failed");
    }
    tracing::info!("server shut down gracefully");
}
