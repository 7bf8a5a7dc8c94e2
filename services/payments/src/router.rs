use axum::{
    Router,
    body::Body,
    http::Request,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use paywell_core::health::{healthz, readyz};
use paywell_core::middleware::{REQUEST_ID_HEADER, propagate_request_id_layer, request_id_layer};

use crate::handlers::{
    breakers::{list_breakers, reset_breaker},
    checkout::create_checkout_session,
    entitlement::{bulk_check_entitlements, check_entitlement, list_entitlements},
    webhook::receive_webhook,
};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Webhooks
        .route("/webhooks/billing", post(receive_webhook))
        // Entitlements
        .route("/entitlements", get(list_entitlements))
        .route("/entitlements/check", get(check_entitlement))
        .route("/entitlements/bulk-check", post(bulk_check_entitlements))
        // Checkout
        .route("/checkout/sessions", post(create_checkout_session))
        // Breaker admin
        .route("/internal/breakers", get(list_breakers))
        .route("/internal/breakers/{name}/reset", post(reset_breaker))
        .layer(propagate_request_id_layer())
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                let request_id = req
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http",
                    method = %req.method(),
                    uri = %req.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(request_id_layer())
        .with_state(state)
}
