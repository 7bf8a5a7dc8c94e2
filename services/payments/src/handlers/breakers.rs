use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;

use paywell_auth_types::identity::Principal;
use paywell_core::error::AppError;
use paywell_core::resilience::{BreakerRegistry, BreakerSnapshot};

// ── GET /internal/breakers ───────────────────────────────────────────────────

pub async fn list_breakers(
    State(breakers): State<Arc<BreakerRegistry>>,
) -> Json<Vec<BreakerSnapshot>> {
    Json(breakers.snapshots())
}

// ── POST /internal/breakers/{name}/reset ─────────────────────────────────────

pub async fn reset_breaker(
    principal: Principal,
    State(breakers): State<Arc<BreakerRegistry>>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    if !principal.is_service() {
        return Err(AppError::Forbidden);
    }
    if !breakers.reset(&name) {
        return Err(AppError::NotFound);
    }
    info!(breaker = %name, requested_by = %principal.user_id, "circuit breaker reset");
    Ok(StatusCode::NO_CONTENT)
}
