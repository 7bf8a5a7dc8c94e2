use axum::{Json, extract::State, http::HeaderMap};
use bytes::Bytes;
use serde::Serialize;

use crate::error::PaymentServiceError;
use crate::state::AppState;
use crate::usecase::webhook::{ProcessWebhookInput, ProcessWebhookUseCase, WebhookOutcome};

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

#[derive(Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: WebhookOutcome,
}

// ── POST /webhooks/billing ───────────────────────────────────────────────────

pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, PaymentServiceError> {
    let signature = header_str(&headers, SIGNATURE_HEADER)
        .ok_or(PaymentServiceError::InvalidSignature)?
        .to_owned();
    let timestamp = header_str(&headers, TIMESTAMP_HEADER)
        .map(|v| v.parse::<i64>())
        .transpose()
        .map_err(|_| PaymentServiceError::MalformedPayload)?;

    let usecase = ProcessWebhookUseCase {
        billing: state.billing.clone(),
        webhook_events: state.webhook_event_repo(),
        entitlements: state.entitlement_repo(),
        payments: state.payment_repo(),
        plans: state.plan_repo(),
        cache: state.cache.clone(),
        tolerance: state.webhook_tolerance,
    };
    let outcome = usecase
        .execute(ProcessWebhookInput {
            payload: body,
            signature,
            timestamp,
        })
        .await?;
    Ok(Json(WebhookAck {
        received: true,
        outcome,
    }))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
