use bytes::Bytes;
use chrono::{Months, Utc};
use serde_json::{Value, json};

use paywell_auth_types::identity::Principal;
use paywell_domain::event::{ENTITLEMENT_GRANTED, ENTITLEMENT_REVOKED, PAYMENT_COMPLETED};
use paywell_payments::domain::types::{BillingCycle, EntitlementStatus, PaymentStatus};
use paywell_payments::error::PaymentServiceError;
use paywell_payments::usecase::entitlement::CheckEntitlementUseCase;
use paywell_payments::usecase::webhook::{ProcessWebhookInput, WebhookOutcome};
use paywell_testing::webhook::{checkout_completed, envelope, sign, signed};

use crate::helpers::{MemoryStore, SECRET, cache, plan, webhook_usecase};

fn input(body: &Value) -> ProcessWebhookInput {
    let (payload, signature) = signed(SECRET, body);
    ProcessWebhookInput {
        payload: Bytes::from(payload),
        signature,
        timestamp: None,
    }
}

fn store() -> MemoryStore {
    let mut monthly = plan("p1", &["storage", "sync"]);
    monthly.billing_cycle = Some(BillingCycle::Monthly);
    MemoryStore::with_plans(vec![monthly])
}

#[tokio::test]
async fn should_grant_plan_features_and_queue_events_for_checkout() {
    let store = store();
    let cache = cache();
    let uc = webhook_usecase(&store, &cache);

    let outcome = uc
        .execute(input(&checkout_completed("evt_1", "u1", "p1")))
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::Processed);

    let mut features: Vec<String> = store
        .entitlements()
        .into_iter()
        .filter(|e| e.user_id == "u1" && e.status == EntitlementStatus::Active)
        .map(|e| e.feature_code)
        .collect();
    features.sort();
    assert_eq!(features, ["storage", "sync"]);
    assert_eq!(store.outbox_of_type(ENTITLEMENT_GRANTED).len(), 2);

    let month_out = Utc::now() + Months::new(1);
    for granted in store.entitlements() {
        let expires_at = granted.expires_at.expect("monthly plan sets an expiry");
        assert!(
            (month_out - expires_at).num_seconds().abs() < 60,
            "expiry {expires_at} should be about one month out"
        );
    }

    let payments = store.payments();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].order_id, "order_evt_1");
    assert_eq!(payments[0].status, PaymentStatus::Completed);
    assert_eq!(store.outbox_of_type(PAYMENT_COMPLETED).len(), 1);

    let records = store.webhook_events();
    assert_eq!(records.len(), 1);
    assert!(records[0].processed, "event should be marked processed");

    let check = CheckEntitlementUseCase {
        entitlements: store.clone(),
        cache: cache.clone(),
    };
    let principal = Principal::user("u1");
    let first = check.execute(&principal, "u1", "storage").await.unwrap();
    let second = check.execute(&principal, "u1", "storage").await.unwrap();
    assert!(first.allowed && !first.from_cache);
    assert!(second.allowed && second.from_cache);
}

#[tokio::test]
async fn should_treat_replayed_event_as_duplicate() {
    let store = store();
    let cache = cache();
    let uc = webhook_usecase(&store, &cache);
    let body = checkout_completed("evt_1", "u1", "p1");

    uc.execute(input(&body)).await.unwrap();
    let outbox_before = store.outbox().len();
    let replay = uc.execute(input(&body)).await.unwrap();

    assert_eq!(replay, WebhookOutcome::Duplicate);
    assert_eq!(store.entitlements().len(), 2);
    assert_eq!(store.outbox().len(), outbox_before);
    assert_eq!(store.webhook_events().len(), 1);
}

#[tokio::test]
async fn should_leave_event_unprocessed_when_a_grant_fails_and_apply_on_redelivery() {
    let store = store();
    let cache = cache();
    let uc = webhook_usecase(&store, &cache);
    let body = checkout_completed("evt_1", "u1", "p1");

    store.fail_grants_for("sync");
    let failed = uc.execute(input(&body)).await;

    assert!(
        matches!(failed, Err(PaymentServiceError::Internal(_))),
        "expected Internal, got {failed:?}"
    );
    assert!(!store.webhook_events()[0].processed);
    assert!(
        store.entitlements().iter().all(|e| e.feature_code != "sync"),
        "failed grant must not leave a row behind"
    );
    assert!(
        store
            .outbox_of_type(ENTITLEMENT_GRANTED)
            .iter()
            .all(|r| r.payload["feature_code"] != "sync"),
        "failed grant must not leave an event behind"
    );

    store.clear_faults();
    let retried = uc.execute(input(&body)).await.unwrap();

    assert_eq!(retried, WebhookOutcome::Processed);
    assert_eq!(store.entitlements().len(), 2);
    assert_eq!(store.outbox_of_type(ENTITLEMENT_GRANTED).len(), 2);
    assert_eq!(store.outbox_of_type(PAYMENT_COMPLETED).len(), 1);
    assert!(store.webhook_events()[0].processed);
}

#[tokio::test]
async fn should_reject_bad_signature_before_recording_anything() {
    let store = store();
    let uc = webhook_usecase(&store, &cache());
    let (payload, _) = signed(SECRET, &checkout_completed("evt_1", "u1", "p1"));

    let result = uc
        .execute(ProcessWebhookInput {
            signature: sign("someone-else", &payload),
            payload: Bytes::from(payload),
            timestamp: None,
        })
        .await;

    assert!(matches!(result, Err(PaymentServiceError::InvalidSignature)));
    assert!(store.webhook_events().is_empty());
    assert!(store.entitlements().is_empty());
}

#[tokio::test]
async fn should_reject_timestamp_outside_tolerance() {
    let store = store();
    let uc = webhook_usecase(&store, &cache());
    let mut request = input(&checkout_completed("evt_1", "u1", "p1"));
    request.timestamp = Some(Utc::now().timestamp() - 301);

    let result = uc.execute(request).await;

    assert!(matches!(result, Err(PaymentServiceError::StaleTimestamp)));
    assert!(store.webhook_events().is_empty());
}

#[tokio::test]
async fn should_reject_out_of_range_timestamps_as_stale() {
    let store = store();
    let uc = webhook_usecase(&store, &cache());

    for timestamp in [i64::MIN, i64::MIN + 1, i64::MAX] {
        let mut request = input(&checkout_completed("evt_1", "u1", "p1"));
        request.timestamp = Some(timestamp);

        let result = uc.execute(request).await;

        assert!(
            matches!(result, Err(PaymentServiceError::StaleTimestamp)),
            "timestamp {timestamp}: {result:?}"
        );
    }
    assert!(store.webhook_events().is_empty());
}

#[tokio::test]
async fn should_reject_old_signed_body_despite_fresh_timestamp_header() {
    let store = store();
    let uc = webhook_usecase(&store, &cache());
    let mut body = checkout_completed("evt_1", "u1", "p1");
    body["created"] = json!(Utc::now().timestamp() - 3600);
    let mut request = input(&body);
    request.timestamp = Some(Utc::now().timestamp());

    let result = uc.execute(request).await;

    assert!(matches!(result, Err(PaymentServiceError::StaleTimestamp)));
    assert!(store.webhook_events().is_empty());
    assert!(store.entitlements().is_empty());
}

#[tokio::test]
async fn should_acknowledge_unhandled_event_types() {
    let store = store();
    let uc = webhook_usecase(&store, &cache());

    let outcome = uc
        .execute(input(&envelope("evt_9", "invoice.created", json!({"id": "in_1"}))))
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::Ignored);
    assert!(store.webhook_events()[0].processed);
    assert!(store.outbox().is_empty());
}

#[tokio::test]
async fn should_revoke_subscription_entitlements_and_invalidate_cache() {
    let store = store();
    let cache = cache();
    let uc = webhook_usecase(&store, &cache);
    let check = CheckEntitlementUseCase {
        entitlements: store.clone(),
        cache: cache.clone(),
    };
    let principal = Principal::user("u1");

    uc.execute(input(&envelope(
        "evt_sub_1",
        "customer.subscription.created",
        json!({"id": "sub_1", "metadata": {"user_id": "u1", "plan_id": "p1"}}),
    )))
    .await
    .unwrap();
    assert!(
        store
            .entitlements()
            .iter()
            .all(|e| e.subscription_id.as_deref() == Some("sub_1"))
    );
    assert!(check.execute(&principal, "u1", "storage").await.unwrap().allowed);

    let outcome = uc
        .execute(input(&envelope(
            "evt_sub_2",
            "customer.subscription.deleted",
            json!({"id": "sub_1", "status": "canceled"}),
        )))
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::Processed);
    assert!(
        store
            .entitlements()
            .iter()
            .all(|e| e.status == EntitlementStatus::Inactive)
    );
    assert_eq!(store.outbox_of_type(ENTITLEMENT_REVOKED).len(), 2);

    let after = check.execute(&principal, "u1", "storage").await.unwrap();
    assert!(!after.allowed);
    assert!(!after.from_cache, "revocation should have dropped the cached grant");
}

#[tokio::test]
async fn should_record_payment_once_per_status() {
    let store = store();
    let uc = webhook_usecase(&store, &cache());
    let object = json!({
        "id": "pi_9",
        "amount": 500,
        "currency": "eur",
        "metadata": {"user_id": "u1", "order_id": "o9"},
    });

    uc.execute(input(&envelope("evt_p1", "payment.succeeded", object.clone())))
        .await
        .unwrap();
    uc.execute(input(&envelope("evt_p2", "payment_intent.succeeded", object)))
        .await
        .unwrap();

    let payments = store.payments();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount_cents, 500);
    assert_eq!(payments[0].currency, "eur");
    assert_eq!(
        payments[0].provider_payment_intent_id.as_deref(),
        Some("pi_9")
    );
    assert_eq!(store.outbox_of_type(PAYMENT_COMPLETED).len(), 1);
}
