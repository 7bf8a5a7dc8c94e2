use anyhow::Context as _;
use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, IntoActiveModel as _, QueryFilter, QueryOrder, Statement, TransactionTrait,
    sea_query::{Expr, OnConflict},
};
use uuid::Uuid;

use paywell_core::resilience::Resilience;
use paywell_domain::event::{ENTITLEMENT_GRANTED, OutboxStatus};
use paywell_payments_schema::{entitlements, outbox_events, payments, plans, webhook_events};

use crate::domain::repository::{
    EntitlementRepository, OutboxRepository, PaymentRepository, PlanRepository,
    WebhookEventRepository,
};
use crate::domain::types::{
    Entitlement, OutboxEvent, OutboxRecord, Payment, Plan, SubscriptionChange, WebhookEventRecord,
};
use crate::error::PaymentServiceError;

/// How long a claimed outbox row stays invisible to other workers.
const CLAIM_LEASE_SECS: i64 = 60;

// ── Plan repository ──────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbPlanRepository {
    pub db: DatabaseConnection,
    pub guard: Resilience,
}

impl PlanRepository for DbPlanRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Plan>, PaymentServiceError> {
        let model = self
            .guard
            .run(|| async move {
                plans::Entity::find_by_id(id.to_owned())
                    .one(&self.db)
                    .await
                    .context("find plan by id")
            })
            .await?;
        Ok(model.map(plan_from_model).transpose()?)
    }
}

fn plan_from_model(model: plans::Model) -> anyhow::Result<Plan> {
    let feature_codes: Vec<String> =
        serde_json::from_value(model.feature_codes).context("decode plan feature codes")?;
    let billing_cycle = model
        .billing_cycle
        .as_deref()
        .map(str::parse)
        .transpose()
        .context("decode plan billing cycle")?;
    Ok(Plan {
        id: model.id,
        name: model.name,
        description: model.description,
        feature_codes,
        billing_cycle,
        price_cents: model.price_cents,
        currency: model.currency,
        active: model.active,
    })
}

// ── Entitlement repository ───────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbEntitlementRepository {
    pub db: DatabaseConnection,
    pub guard: Resilience,
}

impl EntitlementRepository for DbEntitlementRepository {
    async fn find_latest(
        &self,
        user_id: &str,
        feature_code: &str,
    ) -> Result<Option<Entitlement>, PaymentServiceError> {
        let model = self
            .guard
            .run(|| async move {
                entitlements::Entity::find()
                    .filter(entitlements::Column::UserId.eq(user_id))
                    .filter(entitlements::Column::FeatureCode.eq(feature_code))
                    .order_by_desc(entitlements::Column::GrantedAt)
                    .one(&self.db)
                    .await
                    .context("find latest entitlement")
            })
            .await?;
        Ok(model.map(entitlement_from_model).transpose()?)
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Entitlement>, PaymentServiceError> {
        let models = self
            .guard
            .run(|| async move {
                entitlements::Entity::find()
                    .filter(entitlements::Column::UserId.eq(user_id))
                    .order_by_desc(entitlements::Column::GrantedAt)
                    .all(&self.db)
                    .await
                    .context("list entitlements by user")
            })
            .await?;
        Ok(models
            .into_iter()
            .map(entitlement_from_model)
            .collect::<anyhow::Result<Vec<_>>>()?)
    }

    async fn grant_with_outbox(
        &self,
        grant: &Entitlement,
        idempotency_key: &str,
    ) -> Result<Entitlement, PaymentServiceError> {
        let stored = self
            .guard
            .run(|| async move {
                let grant = grant.clone();
                let key = idempotency_key.to_owned();
                self.db
                    .transaction::<_, entitlements::Model, DbErr>(|txn| {
                        Box::pin(async move {
                            let stored = entitlements::Entity::insert(entitlement_active_model(
                                &grant,
                            ))
                            .on_conflict(
                                OnConflict::columns([
                                    entitlements::Column::UserId,
                                    entitlements::Column::FeatureCode,
                                    entitlements::Column::PlanId,
                                ])
                                .update_columns([
                                    entitlements::Column::FamilyId,
                                    entitlements::Column::SubscriptionId,
                                    entitlements::Column::Status,
                                    entitlements::Column::GrantedAt,
                                    entitlements::Column::ExpiresAt,
                                    entitlements::Column::UsageLimits,
                                    entitlements::Column::Metadata,
                                    entitlements::Column::UpdatedAt,
                                ])
                                .to_owned(),
                            )
                            .exec_with_returning(txn)
                            .await?;

                            let entitlement =
                                entitlement_from_model(stored.clone()).map_err(db_custom)?;
                            let event =
                                OutboxEvent::entitlement(ENTITLEMENT_GRANTED, &entitlement, key);
                            insert_outbox(txn, &event).await?;
                            Ok(stored)
                        })
                    })
                    .await
                    .context("grant entitlement with outbox")
            })
            .await?;
        Ok(entitlement_from_model(stored)?)
    }

    async fn update_subscription_with_outbox(
        &self,
        change: &SubscriptionChange,
    ) -> Result<Vec<Entitlement>, PaymentServiceError> {
        let updated = self
            .guard
            .run(|| async move {
                let change = change.clone();
                self.db
                    .transaction::<_, Vec<entitlements::Model>, DbErr>(|txn| {
                        Box::pin(async move {
                            let rows = entitlements::Entity::find()
                                .filter(
                                    entitlements::Column::SubscriptionId
                                        .eq(change.subscription_id.as_str()),
                                )
                                .all(txn)
                                .await?;

                            let now = Utc::now();
                            let mut updated = Vec::with_capacity(rows.len());
                            for row in rows {
                                let mut am = row.into_active_model();
                                am.status = Set(change.status.as_str().to_owned());
                                if let Some(expires_at) = change.expires_at {
                                    am.expires_at = Set(Some(expires_at));
                                }
                                am.updated_at = Set(now);
                                let model = am.update(txn).await?;

                                let entitlement =
                                    entitlement_from_model(model.clone()).map_err(db_custom)?;
                                let key = format!(
                                    "{}:{}:{}",
                                    change.event_type, change.source_event_id, entitlement.id
                                );
                                let event =
                                    OutboxEvent::entitlement(change.event_type, &entitlement, key);
                                insert_outbox(txn, &event).await?;
                                updated.push(model);
                            }
                            Ok(updated)
                        })
                    })
                    .await
                    .context("update subscription entitlements with outbox")
            })
            .await?;
        Ok(updated
            .into_iter()
            .map(entitlement_from_model)
            .collect::<anyhow::Result<Vec<_>>>()?)
    }
}

fn entitlement_active_model(entitlement: &Entitlement) -> entitlements::ActiveModel {
    entitlements::ActiveModel {
        id: Set(entitlement.id),
        user_id: Set(entitlement.user_id.clone()),
        family_id: Set(entitlement.family_id.clone()),
        feature_code: Set(entitlement.feature_code.clone()),
        plan_id: Set(entitlement.plan_id.clone()),
        subscription_id: Set(entitlement.subscription_id.clone()),
        status: Set(entitlement.status.as_str().to_owned()),
        granted_at: Set(entitlement.granted_at),
        expires_at: Set(entitlement.expires_at),
        usage_limits: Set(entitlement.usage_limits.clone()),
        metadata: Set(entitlement.metadata.clone()),
        created_at: Set(entitlement.created_at),
        updated_at: Set(entitlement.updated_at),
    }
}

fn entitlement_from_model(model: entitlements::Model) -> anyhow::Result<Entitlement> {
    Ok(Entitlement {
        id: model.id,
        user_id: model.user_id,
        family_id: model.family_id,
        feature_code: model.feature_code,
        plan_id: model.plan_id,
        subscription_id: model.subscription_id,
        status: model.status.parse().context("decode entitlement status")?,
        granted_at: model.granted_at,
        expires_at: model.expires_at,
        usage_limits: model.usage_limits,
        metadata: model.metadata,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

// ── Payment repository ───────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbPaymentRepository {
    pub db: DatabaseConnection,
    pub guard: Resilience,
}

impl PaymentRepository for DbPaymentRepository {
    async fn find_by_order_id(
        &self,
        order_id: &str,
    ) -> Result<Option<Payment>, PaymentServiceError> {
        let model = self
            .guard
            .run(|| async move {
                payments::Entity::find()
                    .filter(payments::Column::OrderId.eq(order_id))
                    .one(&self.db)
                    .await
                    .context("find payment by order id")
            })
            .await?;
        Ok(model.map(payment_from_model).transpose()?)
    }

    async fn upsert_with_outbox(
        &self,
        payment: &Payment,
        event_type: &str,
        idempotency_key: &str,
    ) -> Result<Payment, PaymentServiceError> {
        let stored = self
            .guard
            .run(|| async move {
                let payment = payment.clone();
                let event_type = event_type.to_owned();
                let key = idempotency_key.to_owned();
                self.db
                    .transaction::<_, payments::Model, DbErr>(|txn| {
                        Box::pin(async move {
                            let stored = payments::Entity::insert(payment_active_model(&payment))
                                .on_conflict(
                                    OnConflict::column(payments::Column::OrderId)
                                        .update_columns([
                                            payments::Column::Status,
                                            payments::Column::AmountCents,
                                            payments::Column::Currency,
                                            payments::Column::ProviderPaymentIntentId,
                                            payments::Column::ProviderSessionId,
                                            payments::Column::Metadata,
                                            payments::Column::UpdatedAt,
                                        ])
                                        .to_owned(),
                                )
                                .exec_with_returning(txn)
                                .await?;

                            let payment = payment_from_model(stored.clone()).map_err(db_custom)?;
                            insert_outbox(txn, &OutboxEvent::payment(&event_type, &payment, key))
                                .await?;
                            Ok(stored)
                        })
                    })
                    .await
                    .context("upsert payment with outbox")
            })
            .await?;
        Ok(payment_from_model(stored)?)
    }
}

fn payment_active_model(payment: &Payment) -> payments::ActiveModel {
    payments::ActiveModel {
        id: Set(payment.id),
        order_id: Set(payment.order_id.clone()),
        user_id: Set(payment.user_id.clone()),
        amount_cents: Set(payment.amount_cents),
        currency: Set(payment.currency.clone()),
        status: Set(payment.status.as_str().to_owned()),
        provider_payment_intent_id: Set(payment.provider_payment_intent_id.clone()),
        provider_session_id: Set(payment.provider_session_id.clone()),
        metadata: Set(payment.metadata.clone()),
        created_at: Set(payment.created_at),
        updated_at: Set(payment.updated_at),
    }
}

fn payment_from_model(model: payments::Model) -> anyhow::Result<Payment> {
    Ok(Payment {
        id: model.id,
        order_id: model.order_id,
        user_id: model.user_id,
        amount_cents: model.amount_cents,
        currency: model.currency,
        status: model.status.parse().context("decode payment status")?,
        provider_payment_intent_id: model.provider_payment_intent_id,
        provider_session_id: model.provider_session_id,
        metadata: model.metadata,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

// ── Webhook event repository ─────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbWebhookEventRepository {
    pub db: DatabaseConnection,
    pub guard: Resilience,
}

impl WebhookEventRepository for DbWebhookEventRepository {
    async fn find_by_event_id(
        &self,
        event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, PaymentServiceError> {
        let model = self
            .guard
            .run(|| async move {
                webhook_events::Entity::find()
                    .filter(webhook_events::Column::EventId.eq(event_id))
                    .one(&self.db)
                    .await
                    .context("find webhook event")
            })
            .await?;
        Ok(model.map(|m| WebhookEventRecord {
            id: m.id,
            event_id: m.event_id,
            event_type: m.event_type,
            payload: m.payload,
            signature: m.signature,
            processed: m.processed,
            processed_at: m.processed_at,
            created_at: m.created_at,
        }))
    }

    async fn insert(&self, record: &WebhookEventRecord) -> Result<bool, PaymentServiceError> {
        let rows = self
            .guard
            .run(|| async move {
                webhook_events::Entity::insert(webhook_events::ActiveModel {
                    id: Set(record.id),
                    event_id: Set(record.event_id.clone()),
                    event_type: Set(record.event_type.clone()),
                    payload: Set(record.payload.clone()),
                    signature: Set(record.signature.clone()),
                    processed: Set(record.processed),
                    processed_at: Set(record.processed_at),
                    created_at: Set(record.created_at),
                })
                .on_conflict(
                    OnConflict::column(webhook_events::Column::EventId)
                        .do_nothing()
                        .to_owned(),
                )
                .exec_without_returning(&self.db)
                .await
                .context("insert webhook event")
            })
            .await?;
        Ok(rows > 0)
    }

    async fn mark_processed(&self, event_id: &str) -> Result<(), PaymentServiceError> {
        self.guard
            .run(|| async move {
                webhook_events::Entity::update_many()
                    .col_expr(webhook_events::Column::Processed, Expr::value(true))
                    .col_expr(webhook_events::Column::ProcessedAt, Expr::value(Utc::now()))
                    .filter(webhook_events::Column::EventId.eq(event_id))
                    .exec(&self.db)
                    .await
                    .context("mark webhook event processed")
            })
            .await?;
        Ok(())
    }
}

// ── Outbox repository ────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbOutboxRepository {
    pub db: DatabaseConnection,
    pub guard: Resilience,
}

impl OutboxRepository for DbOutboxRepository {
    async fn claim_pending(&self, limit: u64) -> Result<Vec<OutboxRecord>, PaymentServiceError> {
        let models = self
            .guard
            .run(|| async move {
                let now = Utc::now();
                let lease_until = now + Duration::seconds(CLAIM_LEASE_SECS);
                let stmt = Statement::from_sql_and_values(
                    self.db.get_database_backend(),
                    r#"
                    UPDATE outbox_events SET next_attempt_at = $2
                    WHERE id IN (
                        SELECT id FROM outbox_events
                        WHERE status = 'pending' AND next_attempt_at <= $1
                        ORDER BY created_at ASC
                        LIMIT $3
                        FOR UPDATE SKIP LOCKED
                    )
                    RETURNING *
                    "#,
                    [now.into(), lease_until.into(), (limit as i64).into()],
                );
                outbox_events::Entity::find()
                    .from_raw_sql(stmt)
                    .all(&self.db)
                    .await
                    .context("claim pending outbox events")
            })
            .await?;

        let mut records = models
            .into_iter()
            .map(outbox_from_model)
            .collect::<anyhow::Result<Vec<_>>>()?;
        // RETURNING does not preserve the subquery order.
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn mark_published(&self, id: Uuid) -> Result<(), PaymentServiceError> {
        self.guard
            .run(|| async move {
                outbox_events::Entity::update_many()
                    .col_expr(
                        outbox_events::Column::Status,
                        Expr::value(OutboxStatus::Published.as_str()),
                    )
                    .col_expr(outbox_events::Column::PublishedAt, Expr::value(Utc::now()))
                    .filter(outbox_events::Column::Id.eq(id))
                    .exec(&self.db)
                    .await
                    .context("mark outbox event published")
            })
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), PaymentServiceError> {
        self.guard
            .run(|| async move {
                outbox_events::Entity::update_many()
                    .col_expr(
                        outbox_events::Column::Status,
                        Expr::value(OutboxStatus::Failed.as_str()),
                    )
                    .col_expr(
                        outbox_events::Column::RetryCount,
                        Expr::col(outbox_events::Column::RetryCount).add(1),
                    )
                    .col_expr(outbox_events::Column::ErrorMessage, Expr::value(error))
                    .filter(outbox_events::Column::Id.eq(id))
                    .exec(&self.db)
                    .await
                    .context("mark outbox event failed")
            })
            .await?;
        Ok(())
    }

    async fn requeue_failed(&self, max_retries: i32) -> Result<u64, PaymentServiceError> {
        let result = self
            .guard
            .run(|| async move {
                outbox_events::Entity::update_many()
                    .col_expr(
                        outbox_events::Column::Status,
                        Expr::value(OutboxStatus::Pending.as_str()),
                    )
                    .col_expr(outbox_events::Column::NextAttemptAt, Expr::value(Utc::now()))
                    .filter(outbox_events::Column::Status.eq(OutboxStatus::Failed.as_str()))
                    .filter(outbox_events::Column::RetryCount.lt(max_retries))
                    .exec(&self.db)
                    .await
                    .context("requeue failed outbox events")
            })
            .await?;
        Ok(result.rows_affected)
    }
}

/// Queue `event` on `conn`. A repeated idempotency key is a no-op.
async fn insert_outbox<C: ConnectionTrait>(conn: &C, event: &OutboxEvent) -> Result<(), DbErr> {
    let now = Utc::now();
    outbox_events::Entity::insert(outbox_events::ActiveModel {
        id: Set(event.id),
        event_type: Set(event.event_type.clone()),
        payload: Set(event.payload.clone()),
        idempotency_key: Set(event.idempotency_key.clone()),
        status: Set(OutboxStatus::Pending.as_str().to_owned()),
        retry_count: Set(0),
        error_message: Set(None),
        created_at: Set(now),
        next_attempt_at: Set(now),
        published_at: Set(None),
    })
    .on_conflict(
        OnConflict::column(outbox_events::Column::IdempotencyKey)
            .do_nothing()
            .to_owned(),
    )
    .exec_without_returning(conn)
    .await?;
    Ok(())
}

fn outbox_from_model(model: outbox_events::Model) -> anyhow::Result<OutboxRecord> {
    Ok(OutboxRecord {
        id: model.id,
        event_type: model.event_type,
        payload: model.payload,
        idempotency_key: model.idempotency_key,
        status: model.status.parse().context("decode outbox status")?,
        retry_count: model.retry_count,
        error_message: model.error_message,
        created_at: model.created_at,
        next_attempt_at: model.next_attempt_at,
        published_at: model.published_at,
    })
}

fn db_custom(err: anyhow::Error) -> DbErr {
    DbErr::Custom(format!("{err:#}"))
}
