use std::sync::Arc;

use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use paywell_core::resilience::Resilience;

use crate::domain::repository::BillingProvider;
use crate::domain::types::{
    CHECKOUT_SESSION_TTL_MINUTES, CheckoutSession, CheckoutSessionRequest, PaymentIntentData,
    WebhookEvent, WebhookEventType,
};
use crate::error::PaymentServiceError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    data: Option<EnvelopeData>,
}

#[derive(Deserialize)]
struct EnvelopeData {
    #[serde(default)]
    object: Value,
}

/// Billing provider that signs webhooks with HMAC-SHA256 over the raw body
/// and hosts checkout pages under a fixed base URL.
#[derive(Clone)]
pub struct HmacBillingProvider {
    secret: Arc<str>,
    checkout_base_url: String,
    guard: Resilience,
}

impl HmacBillingProvider {
    pub fn new(secret: &str, checkout_base_url: &str, guard: Resilience) -> Self {
        Self {
            secret: Arc::from(secret),
            checkout_base_url: checkout_base_url.trim_end_matches('/').to_owned(),
            guard,
        }
    }
}

impl BillingProvider for HmacBillingProvider {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, PaymentServiceError> {
        let session = self
            .guard
            .run(|| async move {
                let session_id = format!("cs_{}", Uuid::new_v4().simple());
                Ok(CheckoutSession {
                    url: format!("{}/{session_id}", self.checkout_base_url),
                    session_id,
                    expires_at: Utc::now() + Duration::minutes(CHECKOUT_SESSION_TTL_MINUTES),
                })
            })
            .await?;
        tracing::info!(
            session_id = %session.session_id,
            user_id = %request.user_id,
            plan_id = %request.plan.id,
            "checkout session created"
        );
        Ok(session)
    }

    fn validate_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<(), PaymentServiceError> {
        if self.secret.is_empty() {
            return Err(anyhow::anyhow!("webhook secret is not configured").into());
        }
        let signature = signature.trim();
        let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
        if signature.is_empty() {
            return Err(PaymentServiceError::InvalidSignature);
        }
        let provided = hex::decode(signature).map_err(|_| PaymentServiceError::InvalidSignature)?;

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("invalid webhook secret: {e}"))?;
        mac.update(payload);
        let expected = mac.finalize().into_bytes();

        if bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            Ok(())
        } else {
            Err(PaymentServiceError::InvalidSignature)
        }
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> Result<WebhookEvent, PaymentServiceError> {
        let raw: Value =
            serde_json::from_slice(payload).map_err(|_| PaymentServiceError::MalformedPayload)?;
        let envelope: Envelope = serde_json::from_value(raw.clone())
            .map_err(|_| PaymentServiceError::MalformedPayload)?;
        if envelope.id.is_empty() || envelope.event_type.is_empty() {
            return Err(PaymentServiceError::MalformedPayload);
        }
        Ok(WebhookEvent {
            id: envelope.id,
            event_type: envelope.event_type,
            created: envelope.created,
            object: envelope.data.map(|d| d.object).unwrap_or(Value::Null),
            raw,
        })
    }

    fn extract_payment_intent_data(
        &self,
        event: &WebhookEvent,
    ) -> Result<PaymentIntentData, PaymentServiceError> {
        let Value::Object(object) = &event.object else {
            return Err(PaymentServiceError::MalformedPayload);
        };
        let kind = WebhookEventType::parse(&event.event_type);
        let object_id = event.str_field("id").map(str::to_owned);

        let metadata: serde_json::Map<String, Value> = object
            .get("metadata")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter(|(_, v)| v.is_string())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let meta = |key: &str| {
            metadata
                .get(key)
                .and_then(Value::as_str)
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
        };

        let payment_intent_id = match kind {
            Some(WebhookEventType::PaymentSucceeded | WebhookEventType::PaymentFailed) => {
                object_id.clone()
            }
            _ => event.str_field("payment_intent").map(str::to_owned),
        };
        let session_id = match kind {
            Some(WebhookEventType::CheckoutSessionCompleted) => object_id.clone(),
            _ => None,
        };
        let subscription_id = match kind {
            Some(k) if k.is_subscription() => object_id,
            _ => event.str_field("subscription").map(str::to_owned),
        };

        Ok(PaymentIntentData {
            user_id: meta("user_id"),
            plan_id: meta("plan_id"),
            family_id: meta("family_id"),
            order_id: meta("order_id"),
            payment_intent_id,
            session_id,
            subscription_id,
            amount_cents: object
                .get("amount_total")
                .or_else(|| object.get("amount"))
                .and_then(Value::as_i64)
                .unwrap_or(0),
            currency: event.str_field("currency").unwrap_or("usd").to_owned(),
            metadata,
        })
    }
}
