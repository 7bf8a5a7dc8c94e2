use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;

use crate::resilience::BreakerRegistry;

/// Handler for `GET /healthz`: liveness.
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Handler for `GET /readyz`: not ready while any dependency breaker is
/// rejecting calls. Readiness returns once a breaker's open timeout passes.
pub async fn readyz(State(breakers): State<Arc<BreakerRegistry>>) -> StatusCode {
    if breakers.none_rejecting() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
