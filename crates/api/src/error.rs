//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::StoreError;
use saga::IntakeError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Order intake rejected the request.
    Intake(IntakeError),
    /// Storage failure.
    Store(StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self {
            ApiError::NotFound(msg) => error_body(StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => error_body(StatusCode::BAD_REQUEST, msg),
            ApiError::Intake(err) => intake_error_to_response(err),
            ApiError::Store(err) => store_error_to_response(&err),
        };
        body.into_response()
    }
}

type ErrorBody = (StatusCode, axum::Json<serde_json::Value>);

fn error_body(status: StatusCode, message: impl Into<String>) -> ErrorBody {
    let message = message.into();
    (status, axum::Json(serde_json::json!({ "error": message })))
}

fn intake_error_to_response(err: IntakeError) -> ErrorBody {
    let reason = match &err {
        IntakeError::InvalidQuantity(_) => "invalid_quantity",
        IntakeError::ProductUnavailable { .. } => "product_unavailable",
        IntakeError::ProductNotFound(_) => "product_not_found",
        IntakeError::DependencyUnavailable(_) => "dependency_unavailable",
        IntakeError::Store(_) => "store",
    };
    metrics::counter!("orders_rejected_total", "reason" => reason).increment(1);

    match err {
        IntakeError::InvalidQuantity(_) => error_body(StatusCode::BAD_REQUEST, err.to_string()),
        IntakeError::ProductUnavailable { stock, .. } => (
            StatusCode::BAD_REQUEST,
            axum::Json(serde_json::json!({
                "error": "Product not available",
                "stock": stock,
            })),
        ),
        IntakeError::ProductNotFound(_) => error_body(StatusCode::NOT_FOUND, err.to_string()),
        IntakeError::DependencyUnavailable(reason) => {
            tracing::warn!(%reason, "product service unavailable");
            error_body(StatusCode::SERVICE_UNAVAILABLE, "Product service unavailable")
        }
        IntakeError::Store(store) => store_error_to_response(&store),
    }
}

fn store_error_to_response(err: &StoreError) -> ErrorBody {
    tracing::error!(error = %err, "storage failure");
    error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        ApiError::Intake(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}
