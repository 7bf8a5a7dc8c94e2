use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use paywell_domain::event::{EVENT_VERSION, OutboxStatus, PublishEvent, aggregate_of};

pub use paywell_domain::entitlement::{Entitlement, EntitlementStatus};
pub use paywell_domain::payment::PaymentStatus;
pub use paywell_domain::plan::{BillingCycle, Plan};

// ── Breaker names ────────────────────────────────────────────────────────────

pub const BILLING_PROVIDER_BREAKER: &str = "billing-provider";
pub const DATABASE_BREAKER: &str = "database";
pub const CACHE_BREAKER: &str = "cache";
pub const PUBLISHER_BREAKER: &str = "outbox-publisher";

// ── Limits ───────────────────────────────────────────────────────────────────

pub const BULK_CHECK_MAX_ITEMS: usize = 100;
pub const BULK_CHECK_CONCURRENCY: usize = 10;
pub const CHECKOUT_SESSION_TTL_MINUTES: i64 = 30;

// ── Webhook ──────────────────────────────────────────────────────────────────

/// Stored idempotency record, keyed by the provider's event id.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEventRecord {
    pub id: Uuid,
    pub event_id: String,
    pub event_type: String,
    pub payload: Value,
    pub signature: String,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Provider webhook after envelope parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: String,
    /// Unix seconds the provider stamped on the envelope.
    pub created: Option<i64>,
    /// `data.object` of the envelope.
    pub object: Value,
    pub raw: Value,
}

impl WebhookEvent {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.object
            .get(key)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
    }

    /// A unix-seconds field of the object as a timestamp.
    pub fn timestamp_field(&self, key: &str) -> Option<DateTime<Utc>> {
        self.object
            .get(key)
            .and_then(Value::as_i64)
            .filter(|secs| *secs > 0)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }
}

/// Event types the service acts on. Anything else is acknowledged and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventType {
    CheckoutSessionCompleted,
    PaymentSucceeded,
    PaymentFailed,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
}

impl WebhookEventType {
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "checkout.session.completed" => Some(Self::CheckoutSessionCompleted),
            "payment.succeeded" | "payment_intent.succeeded" => Some(Self::PaymentSucceeded),
            "payment.failed" | "payment_intent.payment_failed" => Some(Self::PaymentFailed),
            "subscription.created" | "customer.subscription.created" => {
                Some(Self::SubscriptionCreated)
            }
            "subscription.updated" | "customer.subscription.updated" => {
                Some(Self::SubscriptionUpdated)
            }
            "subscription.deleted" | "customer.subscription.deleted" => {
                Some(Self::SubscriptionDeleted)
            }
            _ => None,
        }
    }

    pub fn is_subscription(&self) -> bool {
        matches!(
            self,
            Self::SubscriptionCreated | Self::SubscriptionUpdated | Self::SubscriptionDeleted
        )
    }
}

/// Purchase details pulled out of a checkout, payment or subscription object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentIntentData {
    pub user_id: Option<String>,
    pub plan_id: Option<String>,
    pub family_id: Option<String>,
    pub order_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub session_id: Option<String>,
    pub subscription_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    /// Provider metadata, string values only.
    pub metadata: serde_json::Map<String, Value>,
}

// ── Payment ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: String,
    pub user_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub provider_payment_intent_id: Option<String>,
    pub provider_session_id: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Checkout ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub plan: Plan,
    pub user_id: String,
    pub family_id: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

// ── Subscription changes ─────────────────────────────────────────────────────

/// Status/expiry applied to every entitlement of one subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionChange {
    pub subscription_id: String,
    pub status: EntitlementStatus,
    pub expires_at: Option<DateTime<Utc>>,
    /// `entitlement.updated` or `entitlement.revoked`.
    pub event_type: &'static str,
    /// Provider event id; combined with each entitlement id into the outbox key.
    pub source_event_id: String,
}

// ── Outbox ───────────────────────────────────────────────────────────────────

/// Event queued alongside a state change.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub idempotency_key: String,
}

impl OutboxEvent {
    pub fn entitlement(event_type: &str, entitlement: &Entitlement, idempotency_key: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type: event_type.to_owned(),
            payload: json!({
                "entitlement_id": entitlement.id,
                "user_id": entitlement.user_id,
                "family_id": entitlement.family_id,
                "feature_code": entitlement.feature_code,
                "plan_id": entitlement.plan_id,
                "subscription_id": entitlement.subscription_id,
                "status": entitlement.status.as_str(),
                "expires_at": entitlement.expires_at.map(|t| t.to_rfc3339()),
            }),
            idempotency_key,
        }
    }

    pub fn payment(event_type: &str, payment: &Payment, idempotency_key: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type: event_type.to_owned(),
            payload: json!({
                "payment_id": payment.id,
                "order_id": payment.order_id,
                "user_id": payment.user_id,
                "amount_cents": payment.amount_cents,
                "currency": payment.currency,
                "status": payment.status.as_str(),
                "provider_payment_intent_id": payment.provider_payment_intent_id,
            }),
            idempotency_key,
        }
    }
}

/// Stored outbox row as the worker sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub idempotency_key: String,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    pub fn to_publish_event(&self) -> PublishEvent {
        let data = match &self.payload {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_owned(), other.clone());
                map
            }
        };
        PublishEvent {
            id: self.id.to_string(),
            event_type: self.event_type.clone(),
            aggregate: aggregate_of(&self.event_type).to_owned(),
            data,
            timestamp: self.created_at.timestamp(),
            version: EVENT_VERSION,
        }
    }
}

// ── Cache ────────────────────────────────────────────────────────────────────

/// Result of an entitlement cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Miss,
    /// A recent lookup found nothing; trust it until the negative TTL runs out.
    NotFound,
    Hit(Entitlement),
}
