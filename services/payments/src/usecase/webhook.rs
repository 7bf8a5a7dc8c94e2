use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};
use uuid::Uuid;

use paywell_domain::event::{
    ENTITLEMENT_GRANTED, ENTITLEMENT_REVOKED, ENTITLEMENT_UPDATED, PAYMENT_COMPLETED,
    PAYMENT_FAILED,
};

use crate::domain::repository::{
    BillingProvider, EntitlementCache, EntitlementRepository, PaymentRepository, PlanRepository,
    WebhookEventRepository,
};
use crate::domain::types::{
    Entitlement, EntitlementStatus, Payment, PaymentStatus, SubscriptionChange, WebhookEvent,
    WebhookEventRecord, WebhookEventType,
};
use crate::error::PaymentServiceError;

pub struct ProcessWebhookInput {
    /// Raw request body, exactly as signed.
    pub payload: Bytes,
    pub signature: String,
    /// Provider timestamp header. Checked alongside the envelope's signed
    /// `created`, which is required when the header is absent.
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed,
    /// Already processed earlier; nothing was written.
    Duplicate,
    /// Event type the service does not act on.
    Ignored,
}

/// Writes made for one event.
#[derive(Debug, Default)]
struct Applied {
    /// `(user_id, feature_code)` cache keys to drop.
    touched: Vec<(String, String)>,
    failures: usize,
}

pub struct ProcessWebhookUseCase<B, W, E, P, L, C>
where
    B: BillingProvider,
    W: WebhookEventRepository,
    E: EntitlementRepository,
    P: PaymentRepository,
    L: PlanRepository,
    C: EntitlementCache,
{
    pub billing: B,
    pub webhook_events: W,
    pub entitlements: E,
    pub payments: P,
    pub plans: L,
    pub cache: C,
    pub tolerance: chrono::Duration,
}

impl<B, W, E, P, L, C> ProcessWebhookUseCase<B, W, E, P, L, C>
where
    B: BillingProvider,
    W: WebhookEventRepository,
    E: EntitlementRepository,
    P: PaymentRepository,
    L: PlanRepository,
    C: EntitlementCache,
{
    /// Verify, de-duplicate and apply one provider webhook.
    ///
    /// The event is marked processed only after every write succeeded, so a
    /// failed delivery is retried by the provider and re-applied through the
    /// idempotent upserts.
    pub async fn execute(
        &self,
        input: ProcessWebhookInput,
    ) -> Result<WebhookOutcome, PaymentServiceError> {
        // The signed `created` governs when present; a header must also be fresh.
        let created = envelope_created(&input.payload)?;
        let timestamps = [created, input.timestamp];
        if timestamps.iter().all(Option::is_none) {
            return Err(PaymentServiceError::MalformedPayload);
        }
        for timestamp in timestamps.into_iter().flatten() {
            if !self.within_tolerance(timestamp) {
                warn!(timestamp, "rejecting webhook outside timestamp tolerance");
                return Err(PaymentServiceError::StaleTimestamp);
            }
        }

        if let Err(e) = self
            .billing
            .validate_webhook_signature(&input.payload, &input.signature)
        {
            warn!(error = %e, "rejecting webhook with bad signature");
            return Err(e);
        }
        let event = self.billing.parse_webhook_event(&input.payload)?;

        match self.webhook_events.find_by_event_id(&event.id).await? {
            Some(record) if record.processed => {
                info!(event_id = %event.id, event_type = %event.event_type, "duplicate webhook ignored");
                return Ok(WebhookOutcome::Duplicate);
            }
            Some(_) => {
                warn!(event_id = %event.id, "resuming webhook that was received but never processed");
            }
            None => {
                let record = WebhookEventRecord {
                    id: Uuid::now_v7(),
                    event_id: event.id.clone(),
                    event_type: event.event_type.clone(),
                    payload: event.raw.clone(),
                    signature: input.signature.clone(),
                    processed: false,
                    processed_at: None,
                    created_at: Utc::now(),
                };
                if !self.webhook_events.insert(&record).await? {
                    warn!(event_id = %event.id, "webhook recorded concurrently by another delivery");
                }
            }
        }

        let Some(kind) = WebhookEventType::parse(&event.event_type) else {
            info!(event_id = %event.id, event_type = %event.event_type, "acknowledging unhandled webhook type");
            self.mark_processed(&event.id).await;
            return Ok(WebhookOutcome::Ignored);
        };

        let applied = match kind {
            WebhookEventType::CheckoutSessionCompleted | WebhookEventType::SubscriptionCreated => {
                self.apply_purchase(&event).await?
            }
            WebhookEventType::PaymentSucceeded => {
                self.apply_payment(&event, PaymentStatus::Completed).await?
            }
            WebhookEventType::PaymentFailed => {
                self.apply_payment(&event, PaymentStatus::Failed).await?
            }
            WebhookEventType::SubscriptionUpdated => {
                self.apply_subscription_change(&event, false).await?
            }
            WebhookEventType::SubscriptionDeleted => {
                self.apply_subscription_change(&event, true).await?
            }
        };

        if applied.failures == 0 {
            self.mark_processed(&event.id).await;
        }
        self.invalidate(&applied.touched).await;

        if applied.failures > 0 {
            return Err(anyhow::anyhow!(
                "{} write(s) failed while applying webhook {}",
                applied.failures,
                event.id
            )
            .into());
        }
        info!(event_id = %event.id, event_type = %event.event_type, "webhook processed");
        Ok(WebhookOutcome::Processed)
    }

    fn within_tolerance(&self, timestamp: i64) -> bool {
        Utc::now().timestamp().abs_diff(timestamp) <= self.tolerance.num_seconds().unsigned_abs()
    }

    // ── checkout.session.completed / subscription.created ────────────────────

    async fn apply_purchase(&self, event: &WebhookEvent) -> Result<Applied, PaymentServiceError> {
        let data = self.billing.extract_payment_intent_data(event)?;
        let (Some(user_id), Some(plan_id)) = (data.user_id.as_deref(), data.plan_id.as_deref())
        else {
            warn!(event_id = %event.id, "purchase webhook without user_id or plan_id acknowledged");
            return Ok(Applied::default());
        };
        let Some(plan) = self.plans.find_by_id(plan_id).await? else {
            warn!(event_id = %event.id, plan_id, "purchase webhook for unknown plan acknowledged");
            return Ok(Applied::default());
        };

        let mut applied = Applied::default();
        let now = Utc::now();

        if let Some(order_id) = data.order_id.as_deref() {
            let payment = Payment {
                id: Uuid::now_v7(),
                order_id: order_id.to_owned(),
                user_id: user_id.to_owned(),
                amount_cents: data.amount_cents,
                currency: data.currency.clone(),
                status: PaymentStatus::Completed,
                provider_payment_intent_id: data.payment_intent_id.clone(),
                provider_session_id: data.session_id.clone(),
                metadata: Some(Value::Object(data.metadata.clone())),
                created_at: now,
                updated_at: now,
            };
            let key = format!("{PAYMENT_COMPLETED}:{}", event.id);
            if let Err(e) = self
                .payments
                .upsert_with_outbox(&payment, PAYMENT_COMPLETED, &key)
                .await
            {
                error!(event_id = %event.id, order_id, error = %e, "failed to record payment");
                applied.failures += 1;
            }
        }

        let granted_at = event.created_at().unwrap_or(now);
        let expires_at = plan.expiry_from(granted_at);
        for feature_code in &plan.feature_codes {
            let grant = Entitlement {
                id: Uuid::now_v7(),
                user_id: user_id.to_owned(),
                family_id: data.family_id.clone(),
                feature_code: feature_code.clone(),
                plan_id: plan.id.clone(),
                subscription_id: data.subscription_id.clone(),
                status: EntitlementStatus::Active,
                granted_at,
                expires_at,
                usage_limits: None,
                metadata: Some(json!({ "source_event_id": event.id })),
                created_at: now,
                updated_at: now,
            };
            let key = format!("{ENTITLEMENT_GRANTED}:{}:{feature_code}", event.id);
            match self.entitlements.grant_with_outbox(&grant, &key).await {
                Ok(stored) => {
                    info!(
                        user_id = %stored.user_id,
                        feature_code = %stored.feature_code,
                        plan_id = %stored.plan_id,
                        entitlement_id = %stored.id,
                        "entitlement granted"
                    );
                    applied.touched.push((stored.user_id, stored.feature_code));
                }
                Err(e) => {
                    error!(event_id = %event.id, user_id, feature_code = %feature_code, error = %e, "failed to grant entitlement");
                    applied.failures += 1;
                }
            }
        }
        Ok(applied)
    }

    // ── payment.succeeded / payment.failed ───────────────────────────────────

    async fn apply_payment(
        &self,
        event: &WebhookEvent,
        status: PaymentStatus,
    ) -> Result<Applied, PaymentServiceError> {
        let mut data = self.billing.extract_payment_intent_data(event)?;
        let Some(order_id) = data.order_id.clone().or_else(|| data.payment_intent_id.clone())
        else {
            warn!(event_id = %event.id, "payment webhook without order or intent id acknowledged");
            return Ok(Applied::default());
        };

        let existing = self.payments.find_by_order_id(&order_id).await?;
        if let Some(existing) = &existing {
            if existing.status.is_final() || existing.status == status {
                info!(order_id = %order_id, status = %existing.status, "payment already settled; skipping");
                return Ok(Applied::default());
            }
        }
        let Some(user_id) = data
            .user_id
            .clone()
            .or_else(|| existing.as_ref().map(|p| p.user_id.clone()))
        else {
            warn!(event_id = %event.id, order_id = %order_id, "payment webhook without user_id acknowledged");
            return Ok(Applied::default());
        };

        if status == PaymentStatus::Failed {
            for key in ["failure_code", "failure_message"] {
                if let Some(value) = event.str_field(key) {
                    data.metadata.insert(key.to_owned(), Value::from(value));
                }
            }
        }

        let now = Utc::now();
        let payment = Payment {
            id: existing.as_ref().map_or_else(Uuid::now_v7, |p| p.id),
            order_id,
            user_id,
            amount_cents: data.amount_cents,
            currency: data.currency,
            status,
            provider_payment_intent_id: data.payment_intent_id,
            provider_session_id: data.session_id,
            metadata: Some(Value::Object(data.metadata)),
            created_at: existing.as_ref().map_or(now, |p| p.created_at),
            updated_at: now,
        };
        let event_type = match status {
            PaymentStatus::Failed => PAYMENT_FAILED,
            _ => PAYMENT_COMPLETED,
        };
        let key = format!("{event_type}:{}", event.id);
        let stored = self
            .payments
            .upsert_with_outbox(&payment, event_type, &key)
            .await?;
        info!(order_id = %stored.order_id, status = %stored.status, "payment recorded");
        Ok(Applied::default())
    }

    // ── subscription.updated / subscription.deleted ──────────────────────────

    async fn apply_subscription_change(
        &self,
        event: &WebhookEvent,
        deleted: bool,
    ) -> Result<Applied, PaymentServiceError> {
        let data = self.billing.extract_payment_intent_data(event)?;
        let Some(subscription_id) = data.subscription_id else {
            warn!(event_id = %event.id, "subscription webhook without id acknowledged");
            return Ok(Applied::default());
        };

        let change = if deleted {
            SubscriptionChange {
                subscription_id,
                status: EntitlementStatus::Inactive,
                expires_at: event
                    .timestamp_field("ended_at")
                    .or_else(|| event.timestamp_field("canceled_at"))
                    .or_else(|| Some(Utc::now())),
                event_type: ENTITLEMENT_REVOKED,
                source_event_id: event.id.clone(),
            }
        } else {
            SubscriptionChange {
                subscription_id,
                status: subscription_status(event.str_field("status")),
                expires_at: event.timestamp_field("current_period_end"),
                event_type: ENTITLEMENT_UPDATED,
                source_event_id: event.id.clone(),
            }
        };

        let updated = self
            .entitlements
            .update_subscription_with_outbox(&change)
            .await?;
        if updated.is_empty() {
            info!(subscription_id = %change.subscription_id, "no entitlements for subscription");
        }
        Ok(Applied {
            touched: updated
                .into_iter()
                .map(|e| (e.user_id, e.feature_code))
                .collect(),
            failures: 0,
        })
    }

    async fn mark_processed(&self, event_id: &str) {
        if let Err(e) = self.webhook_events.mark_processed(event_id).await {
            error!(event_id, error = %e, "failed to mark webhook processed");
        }
    }

    async fn invalidate(&self, keys: &[(String, String)]) {
        for (user_id, feature_code) in keys {
            if let Err(e) = self.cache.delete(user_id, feature_code).await {
                warn!(user_id = %user_id, feature_code = %feature_code, error = %e, "failed to invalidate entitlement cache");
            }
        }
    }
}

/// `created` from the envelope, for deliveries without a timestamp header.
fn envelope_created(payload: &[u8]) -> Result<Option<i64>, PaymentServiceError> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|_| PaymentServiceError::MalformedPayload)?;
    Ok(value.get("created").and_then(Value::as_i64))
}

/// Provider subscription status to entitlement status. Updates re-activate
/// unless the provider reports the subscription as ended.
fn subscription_status(status: Option<&str>) -> EntitlementStatus {
    match status {
        Some("canceled" | "unpaid" | "incomplete_expired") => EntitlementStatus::Inactive,
        Some("paused") => EntitlementStatus::Suspended,
        _ => EntitlementStatus::Active,
    }
}
