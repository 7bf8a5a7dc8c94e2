use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use paywell_core::resilience::ResilienceError;

/// Payments service domain error variants.
#[derive(Debug, thiserror::Error)]
pub enum PaymentServiceError {
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("webhook timestamp outside tolerance")]
    StaleTimestamp,
    #[error("malformed payload")]
    MalformedPayload,
    #[error("{0}")]
    InvalidRequest(String),
    #[error("plan not found")]
    PlanNotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("dependency unavailable")]
    Unavailable,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl PaymentServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::StaleTimestamp => "STALE_TIMESTAMP",
            Self::MalformedPayload => "MALFORMED_PAYLOAD",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::PlanNotFound => "PLAN_NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

/// An open breaker surfaces as `Unavailable`; anything else the wrapper
/// gave up on is internal.
impl From<ResilienceError> for PaymentServiceError {
    fn from(err: ResilienceError) -> Self {
        match err {
            ResilienceError::CircuitOpen { .. } => Self::Unavailable,
            other => Self::Internal(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for PaymentServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidSignature | Self::StaleTimestamp => StatusCode::UNAUTHORIZED,
            Self::MalformedPayload | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::PlanNotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if let Self::Internal(ref e) = self {
            tracing::error!(error = format!("{e:#}"), kind = "INTERNAL", "internal error");
        }
        let body = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}
