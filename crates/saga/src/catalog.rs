//! Product catalog client used by order intake.
//!
//! [`GuardedCatalog`] puts a per-call timeout and a [`CircuitBreaker`] in
//! front of any [`ProductCatalog`], so a slow or failing catalog is cut off
//! instead of stalling every order request.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::ProductId;
use resilience::{CircuitBreaker, CircuitBreakerError};
use thiserror::Error;
use tokio::sync::Mutex;

/// A catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: f64,
    pub stock: i32,
}

/// Answer to an availability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    pub stock: i32,
}

/// Errors from the catalog.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Product not found: {0}")]
    NotFound(ProductId),

    #[error("Catalog call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

/// Synchronous product lookups.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Whether `quantity` units are in stock. Unknown products are reported
    /// as unavailable with zero stock.
    async fn check_availability(
        &self,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<Availability, CatalogError>;

    async fn get_product(&self, product_id: ProductId) -> Result<Product, CatalogError>;
}

#[async_trait]
impl<C: ProductCatalog + ?Sized> ProductCatalog for Arc<C> {
    async fn check_availability(
        &self,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<Availability, CatalogError> {
        (**self).check_availability(product_id, quantity).await
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Product, CatalogError> {
        (**self).get_product(product_id).await
    }
}

#[derive(Debug, Default)]
struct CatalogState {
    products: HashMap<ProductId, Product>,
    failing: bool,
    latency: Duration,
    calls: u32,
}

/// In-memory catalog for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog holding `products`.
    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let state = CatalogState {
            products: products.into_iter().map(|p| (p.id, p)).collect(),
            ..CatalogState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Adds or replaces a product.
    pub async fn upsert(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    /// Makes every call fail with [`CatalogError::Unavailable`].
    pub async fn set_failing(&self, failing: bool) {
        self.state.lock().await.failing = failing;
    }

    /// Delays every call by `latency`.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = latency;
    }

    /// Number of calls that reached the catalog.
    pub async fn calls(&self) -> u32 {
        self.state.lock().await.calls
    }

    /// Counts the call and applies injected faults.
    async fn enter(&self) -> Result<(), CatalogError> {
        let latency = {
            let mut state = self.state.lock().await;
            state.calls += 1;
            if state.failing {
                return Err(CatalogError::Unavailable("catalog switched off".to_string()));
            }
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn check_availability(
        &self,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<Availability, CatalogError> {
        self.enter().await?;
        let state = self.state.lock().await;
        let stock = state.products.get(&product_id).map_or(0, |p| p.stock);
        Ok(Availability {
            available: stock >= quantity,
            stock,
        })
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Product, CatalogError> {
        self.enter().await?;
        self.state
            .lock()
            .await
            .products
            .get(&product_id)
            .cloned()
            .ok_or(CatalogError::NotFound(product_id))
    }
}

/// Error from a guarded catalog call.
pub type GuardedError = CircuitBreakerError<CatalogError>;

/// A catalog behind a circuit breaker and a per-call timeout.
///
/// Timeouts and catalog errors, `NotFound` included, count as breaker
/// failures.
pub struct GuardedCatalog<C> {
    inner: C,
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl<C: ProductCatalog> GuardedCatalog<C> {
    pub fn new(inner: C, breaker: CircuitBreaker, timeout: Duration) -> Self {
        Self {
            inner,
            breaker,
            timeout,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Checks stock through the breaker.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitBreakerError::Open`] while the circuit is open, or
    /// the catalog's error (including a timeout) otherwise.
    pub async fn check_availability(
        &self,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<Availability, GuardedError> {
        self.breaker
            .execute(|| self.bounded(self.inner.check_availability(product_id, quantity)))
            .await
    }

    /// Fetches a product through the breaker.
    ///
    /// # Errors
    ///
    /// Same as [`GuardedCatalog::check_availability`].
    pub async fn get_product(&self, product_id: ProductId) -> Result<Product, GuardedError> {
        self.breaker
            .execute(|| self.bounded(self.inner.get_product(product_id)))
            .await
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, CatalogError>>,
    ) -> Result<T, CatalogError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    dependency = self.breaker.dependency(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "catalog call timed out"
                );
                Err(CatalogError::Timeout(self.timeout))
            }
        }
    }
}
