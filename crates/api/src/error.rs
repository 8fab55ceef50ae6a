//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::ValidationError;
use placement::PlacementError;
use serde_json::{Value, json};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Failure reported by the placement core.
    Placement(PlacementError),
    /// The caller did not present a usable identity.
    Unauthorized(String),
}

impl ApiError {
    /// A request field could not be parsed.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ApiError::Placement(ValidationError::new(field, reason).into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "unauthorized", "message": msg, "details": {} }),
            ),
            ApiError::Placement(err) => placement_error_to_response(err),
        };

        (status, axum::Json(body)).into_response()
    }
}

fn placement_error_to_response(err: PlacementError) -> (StatusCode, Value) {
    let status = match &err {
        PlacementError::Validation(_) => StatusCode::BAD_REQUEST,
        PlacementError::NotFound(_) => StatusCode::NOT_FOUND,
        PlacementError::Conflict(_) => StatusCode::CONFLICT,
        PlacementError::System(msg) => {
            tracing::error!(error = %msg, "system error");
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    let details = match &err {
        PlacementError::Validation(e) => serde_json::to_value(e).unwrap_or_default(),
        PlacementError::NotFound(nf) => serde_json::to_value(nf).unwrap_or_default(),
        PlacementError::Conflict(c) => serde_json::to_value(c).unwrap_or_default(),
        PlacementError::System(_) => json!({}),
    };

    (
        status,
        json!({
            "error": err.kind(),
            "message": err.to_string(),
            "details": details,
        }),
    )
}

impl From<PlacementError> for ApiError {
    fn from(err: PlacementError) -> Self {
        ApiError::Placement(err)
    }
}
