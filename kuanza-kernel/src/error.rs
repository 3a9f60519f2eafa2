use crate::store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Failures raised by the resilience components.
#[derive(Debug, thiserror::Error)]
pub enum ResilienceError {
    #[error("network unavailable for device {device_id}; retry when online or force the sync")]
    NetworkUnavailable { device_id: String },
    #[error("{channel} fallback not configured for device {device_id}")]
    NotConfigured { device_id: String, channel: &'static str },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("no {channel} credits left for device {device_id}")]
    InsufficientCredits { device_id: String, channel: &'static str },
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl ResilienceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NetworkUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotConfigured { .. } => StatusCode::PRECONDITION_FAILED,
            Self::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable kind, returned as `error` in the body.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NetworkUnavailable { .. } => "network_unavailable",
            Self::NotConfigured { .. } => "not_configured",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation_error",
            Self::InsufficientCredits { .. } => "insufficient_credits",
            Self::Store(_) => "internal_error",
        }
    }
}

impl IntoResponse for ResilienceError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "message": self.to_string(),
            "error": self.kind(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ResilienceError>;
