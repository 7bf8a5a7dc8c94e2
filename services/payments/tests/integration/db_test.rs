//! Transactional repository writes against an in-memory SQLite database.

use chrono::Utc;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, PaginatorTrait,
};
use sea_orm_migration::MigratorTrait;
use uuid::Uuid;

use paywell_core::resilience::{BreakerRegistry, CircuitBreakerConfig, Resilience, RetryPolicy};
use paywell_domain::event::PAYMENT_COMPLETED;
use paywell_payments::domain::repository::{EntitlementRepository, PaymentRepository};
use paywell_payments::domain::types::{DATABASE_BREAKER, Payment, PaymentStatus};
use paywell_payments::error::PaymentServiceError;
use paywell_payments::infra::db::{DbEntitlementRepository, DbPaymentRepository};
use paywell_payments_migration::Migrator;
use paywell_payments_schema::{entitlements, outbox_events, payments};

use crate::helpers::entitlement;

const FAIL_OUTBOX: &str = "
    CREATE TRIGGER fail_outbox BEFORE INSERT ON outbox_events
    BEGIN SELECT RAISE(ABORT, 'outbox unavailable'); END";

async fn database() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

fn guard() -> Resilience {
    BreakerRegistry::new().resilience(
        DATABASE_BREAKER,
        CircuitBreakerConfig::default(),
        RetryPolicy::none(),
    )
}

fn payment(order_id: &str) -> Payment {
    let now = Utc::now();
    Payment {
        id: Uuid::now_v7(),
        order_id: order_id.to_owned(),
        user_id: "u1".to_owned(),
        amount_cents: 999,
        currency: "usd".to_owned(),
        status: PaymentStatus::Completed,
        provider_payment_intent_id: Some("pi_1".to_owned()),
        provider_session_id: None,
        metadata: None,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn should_roll_back_grant_when_outbox_insert_fails() {
    let db = database().await;
    let repo = DbEntitlementRepository {
        db: db.clone(),
        guard: guard(),
    };
    let grant = entitlement("u1", "storage", None);
    db.execute_unprepared(FAIL_OUTBOX).await.unwrap();

    let result = repo.grant_with_outbox(&grant, "evt_1:storage").await;

    assert!(matches!(result, Err(PaymentServiceError::Internal(_))));
    assert_eq!(entitlements::Entity::find().count(&db).await.unwrap(), 0);
    assert_eq!(outbox_events::Entity::find().count(&db).await.unwrap(), 0);

    db.execute_unprepared("DROP TRIGGER fail_outbox").await.unwrap();
    let stored = repo.grant_with_outbox(&grant, "evt_1:storage").await.unwrap();

    assert_eq!(stored.feature_code, "storage");
    assert_eq!(entitlements::Entity::find().count(&db).await.unwrap(), 1);
    assert_eq!(outbox_events::Entity::find().count(&db).await.unwrap(), 1);
}

#[tokio::test]
async fn should_regrant_without_duplicating_row_or_event() {
    let db = database().await;
    let repo = DbEntitlementRepository {
        db: db.clone(),
        guard: guard(),
    };
    let grant = entitlement("u1", "storage", None);

    repo.grant_with_outbox(&grant, "evt_1:storage").await.unwrap();
    repo.grant_with_outbox(&grant, "evt_1:storage").await.unwrap();

    assert_eq!(entitlements::Entity::find().count(&db).await.unwrap(), 1);
    assert_eq!(outbox_events::Entity::find().count(&db).await.unwrap(), 1);
}

#[tokio::test]
async fn should_roll_back_payment_when_outbox_insert_fails() {
    let db = database().await;
    let repo = DbPaymentRepository {
        db: db.clone(),
        guard: guard(),
    };
    db.execute_unprepared(FAIL_OUTBOX).await.unwrap();

    let result = repo
        .upsert_with_outbox(&payment("order_1"), PAYMENT_COMPLETED, "evt_1:payment")
        .await;

    assert!(result.is_err());
    assert_eq!(payments::Entity::find().count(&db).await.unwrap(), 0);
    assert!(repo.find_by_order_id("order_1").await.unwrap().is_none());
}
