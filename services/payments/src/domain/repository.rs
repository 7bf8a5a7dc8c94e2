#![allow(async_fn_in_trait)]

use uuid::Uuid;

use paywell_domain::event::PublishEvent;

use crate::domain::types::{
    CacheLookup, CheckoutSession, CheckoutSessionRequest, Entitlement, OutboxRecord, Payment,
    PaymentIntentData, Plan, SubscriptionChange, WebhookEvent, WebhookEventRecord,
};
use crate::error::PaymentServiceError;

/// Read access to the plan catalog.
pub trait PlanRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Plan>, PaymentServiceError>;
}

/// Entitlement storage. Every write queues its outbox event in the same
/// transaction.
pub trait EntitlementRepository: Send + Sync {
    /// Most recently granted row for `(user_id, feature_code)`, any status.
    async fn find_latest(
        &self,
        user_id: &str,
        feature_code: &str,
    ) -> Result<Option<Entitlement>, PaymentServiceError>;

    /// All rows for `user_id`, newest grant first.
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Entitlement>, PaymentServiceError>;

    /// Upsert on `(user_id, feature_code, plan_id)` and queue an
    /// `entitlement.granted` event for the stored row under `idempotency_key`.
    /// Returns the stored row.
    async fn grant_with_outbox(
        &self,
        grant: &Entitlement,
        idempotency_key: &str,
    ) -> Result<Entitlement, PaymentServiceError>;

    /// Apply `change` to every entitlement of the subscription, queuing one
    /// event per row. Returns the updated rows.
    async fn update_subscription_with_outbox(
        &self,
        change: &SubscriptionChange,
    ) -> Result<Vec<Entitlement>, PaymentServiceError>;
}

/// Payment storage, upserted by order id.
pub trait PaymentRepository: Send + Sync {
    async fn find_by_order_id(&self, order_id: &str)
    -> Result<Option<Payment>, PaymentServiceError>;

    /// Upsert by `order_id` and queue `event_type` for the stored row.
    async fn upsert_with_outbox(
        &self,
        payment: &Payment,
        event_type: &str,
        idempotency_key: &str,
    ) -> Result<Payment, PaymentServiceError>;
}

/// Webhook idempotency records.
pub trait WebhookEventRepository: Send + Sync {
    async fn find_by_event_id(
        &self,
        event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, PaymentServiceError>;

    /// Returns `false` if a record for the event id already exists.
    async fn insert(&self, record: &WebhookEventRecord) -> Result<bool, PaymentServiceError>;

    async fn mark_processed(&self, event_id: &str) -> Result<(), PaymentServiceError>;
}

/// Outbox rows awaiting publication.
pub trait OutboxRepository: Send + Sync {
    /// Lease up to `limit` pending rows, oldest first. Rows leased by another
    /// worker are skipped.
    async fn claim_pending(&self, limit: u64) -> Result<Vec<OutboxRecord>, PaymentServiceError>;

    async fn mark_published(&self, id: Uuid) -> Result<(), PaymentServiceError>;

    /// Record a failed attempt and bump the retry count.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), PaymentServiceError>;

    /// Move failed rows with fewer than `max_retries` attempts back to pending.
    /// Returns the number of rows moved.
    async fn requeue_failed(&self, max_retries: i32) -> Result<u64, PaymentServiceError>;
}

/// Read-through cache for entitlement checks.
pub trait EntitlementCache: Send + Sync {
    async fn get(
        &self,
        user_id: &str,
        feature_code: &str,
    ) -> Result<CacheLookup, PaymentServiceError>;

    async fn set(&self, entitlement: &Entitlement) -> Result<(), PaymentServiceError>;

    /// Remember that `(user_id, feature_code)` has no valid entitlement.
    async fn set_not_found(
        &self,
        user_id: &str,
        feature_code: &str,
    ) -> Result<(), PaymentServiceError>;

    async fn delete(&self, user_id: &str, feature_code: &str) -> Result<(), PaymentServiceError>;
}

/// Downstream event sink. Errors stay `anyhow` so the retry classifier can
/// inspect them.
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &PublishEvent) -> anyhow::Result<()>;

    /// Publish in order, stopping at the first failure.
    async fn publish_batch(&self, events: &[PublishEvent]) -> anyhow::Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()>;
}

/// Billing provider boundary.
pub trait BillingProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, PaymentServiceError>;

    fn validate_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<(), PaymentServiceError>;

    fn parse_webhook_event(&self, payload: &[u8]) -> Result<WebhookEvent, PaymentServiceError>;

    fn extract_payment_intent_data(
        &self,
        event: &WebhookEvent,
    ) -> Result<PaymentIntentData, PaymentServiceError>;
}
