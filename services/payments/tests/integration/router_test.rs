use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::{TestRequest, TestServer};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde_json::{Value, json};

use paywell_core::middleware::REQUEST_ID_HEADER;
use paywell_core::resilience::{
    BreakerRegistry, CircuitBreakerConfig, CircuitState, ResilienceError,
};
use paywell_payments::handlers::webhook::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use paywell_payments::router::build_router;
use paywell_payments::state::AppState;
use paywell_testing::auth::MockAuth;
use paywell_testing::webhook::{checkout_completed, signed};

use crate::helpers::{SECRET, billing, cache};

/// Router over a disconnected database: only paths that answer before any
/// query are exercised here.
fn server() -> (TestServer, Arc<BreakerRegistry>) {
    let breakers = Arc::new(BreakerRegistry::new());
    let state = AppState {
        db: DatabaseConnection::Disconnected,
        cache: cache(),
        billing: billing(),
        breakers: Arc::clone(&breakers),
        webhook_tolerance: chrono::Duration::seconds(300),
        upgrade_base_url: "https://paywell.test/upgrade".to_owned(),
    };
    (TestServer::new(build_router(state)).unwrap(), breakers)
}

fn as_caller(request: TestRequest, auth: &MockAuth) -> TestRequest {
    auth.headers()
        .iter()
        .fold(request, |request, (name, value)| {
            request.add_header(name.clone(), value.clone())
        })
}

async fn trip(breakers: &BreakerRegistry, name: &str) {
    let breaker = breakers.get_or_create(
        name,
        CircuitBreakerConfig {
            max_failures: 1,
            timeout: Duration::from_secs(60),
            ..CircuitBreakerConfig::default()
        },
    );
    let _ = breaker
        .call(|| async {
            Err::<(), _>(ResilienceError::from(anyhow::anyhow!("connection refused")))
        })
        .await;
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test]
async fn should_report_health_and_readiness() {
    let (server, breakers) = server();

    server.get("/healthz").await.assert_status_ok();
    server.get("/readyz").await.assert_status_ok();

    trip(&breakers, "database").await;
    server
        .get("/readyz")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn should_echo_request_id() {
    let (server, _) = server();

    let response = server.get("/healthz").await;

    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
}

#[tokio::test]
async fn should_list_and_reset_breakers() {
    let (server, breakers) = server();
    trip(&breakers, "database").await;

    let listed: Value = server.get("/internal/breakers").await.json();
    assert_eq!(listed[0]["name"], "database");
    assert_eq!(listed[0]["state"], "open");

    as_caller(
        server.post("/internal/breakers/database/reset"),
        &MockAuth::user("u1"),
    )
    .await
    .assert_status(StatusCode::FORBIDDEN);

    as_caller(
        server.post("/internal/breakers/nope/reset"),
        &MockAuth::service("ops"),
    )
    .await
    .assert_status(StatusCode::NOT_FOUND);

    as_caller(
        server.post("/internal/breakers/database/reset"),
        &MockAuth::service("ops"),
    )
    .await
    .assert_status(StatusCode::NO_CONTENT);
    assert!(breakers.none_rejecting());
}

#[tokio::test]
async fn should_reject_unsigned_webhook() {
    let (server, _) = server();
    let (body, _) = signed(SECRET, &checkout_completed("evt_1", "u1", "p1"));

    let response = server.post("/webhooks/billing").bytes(body.into()).await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    let error: Value = response.json();
    assert_eq!(error["kind"], "INVALID_SIGNATURE");
}

#[tokio::test]
async fn should_reject_webhook_with_stale_timestamp_header() {
    let (server, _) = server();
    let (body, signature) = signed(SECRET, &checkout_completed("evt_1", "u1", "p1"));
    let stale = (Utc::now().timestamp() - 600).to_string();

    let response = server
        .post("/webhooks/billing")
        .add_header(SIGNATURE_HEADER, signature)
        .add_header(TIMESTAMP_HEADER, stale)
        .bytes(body.into())
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    let error: Value = response.json();
    assert_eq!(error["kind"], "STALE_TIMESTAMP");
}

#[tokio::test]
async fn should_require_identity_for_entitlement_routes() {
    let (server, _) = server();

    server
        .get("/entitlements/check")
        .add_query_param("feature_code", "storage")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn should_forbid_checking_another_users_entitlement() {
    let (server, _) = server();

    let response = as_caller(
        server
            .get("/entitlements/check")
            .add_query_param("feature_code", "storage")
            .add_query_param("user_id", "u2"),
        &MockAuth::user("u1"),
    )
    .await;

    response.assert_status(StatusCode::FORBIDDEN);
    let error: Value = response.json();
    assert_eq!(error["kind"], "FORBIDDEN");
}

#[tokio::test]
async fn should_reject_empty_bulk_check() {
    let (server, _) = server();

    let response = as_caller(
        server
            .post("/entitlements/bulk-check")
            .json(&json!({"checks": []})),
        &MockAuth::user("u1"),
    )
    .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let error: Value = response.json();
    assert_eq!(error["kind"], "INVALID_REQUEST");
}

#[tokio::test]
async fn should_require_plan_for_checkout() {
    let (server, _) = server();

    let response = as_caller(
        server.post("/checkout/sessions").json(&json!({})),
        &MockAuth::user("u1"),
    )
    .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}
