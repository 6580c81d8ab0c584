//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use resilience::BreakerState;
use serde::Serialize;

use super::orders::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` while the catalog circuit is open.
    pub status: &'static str,
    pub catalog_circuit: &'static str,
}

/// GET /health
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let circuit = state.intake.catalog().breaker().state();
    Json(HealthResponse {
        status: if circuit == BreakerState::Open {
            "degraded"
        } else {
            "ok"
        },
        catalog_circuit: circuit.as_str(),
    })
}
