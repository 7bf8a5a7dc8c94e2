use std::time::Duration;

use paywell_auth_types::identity::Principal;
use paywell_payments::domain::types::EntitlementStatus;
use paywell_payments::error::PaymentServiceError;
use paywell_payments::usecase::entitlement::{
    CheckEntitlementUseCase, ListUserEntitlementsUseCase,
};

use crate::helpers::{MemoryStore, cache, entitlement};

#[tokio::test(start_paused = true)]
async fn should_trust_negative_cache_until_ttl_expires() {
    let store = MemoryStore::default();
    let uc = CheckEntitlementUseCase {
        entitlements: store.clone(),
        cache: cache(),
    };
    let principal = Principal::user("u1");

    let miss = uc.execute(&principal, "u1", "storage").await.unwrap();
    assert!(!miss.allowed && !miss.from_cache);

    // Granted behind the cache's back: nothing invalidates the negative entry.
    store.seed_entitlement(entitlement("u1", "storage", None));

    tokio::time::advance(Duration::from_secs(9)).await;
    let cached = uc.execute(&principal, "u1", "storage").await.unwrap();
    assert!(!cached.allowed, "negative entry should still hold at 9s");
    assert!(cached.from_cache);

    tokio::time::advance(Duration::from_secs(2)).await;
    let fresh = uc.execute(&principal, "u1", "storage").await.unwrap();
    assert!(fresh.allowed, "negative entry should have lapsed at 11s");
    assert!(!fresh.from_cache);
}

#[tokio::test]
async fn should_fall_back_to_family_shared_entitlement() {
    let store = MemoryStore::default();
    let shared = entitlement("u1", "storage", Some("fam1"));
    let mut own = entitlement("u1", "storage", None);
    own.plan_id = "p2".to_owned();
    own.status = EntitlementStatus::Suspended;
    own.granted_at = shared.granted_at + chrono::Duration::seconds(1);
    store.seed_entitlement(shared.clone());
    store.seed_entitlement(own);

    let uc = CheckEntitlementUseCase {
        entitlements: store,
        cache: cache(),
    };
    let check = uc
        .execute(&Principal::user("u1"), "u1", "storage")
        .await
        .unwrap();

    assert!(check.allowed);
    assert_eq!(check.entitlement.map(|e| e.id), Some(shared.id));
}

#[tokio::test]
async fn should_deny_expired_entitlement() {
    let store = MemoryStore::default();
    let mut expired = entitlement("u1", "storage", None);
    expired.expires_at = Some(chrono::Utc::now() - chrono::Duration::minutes(1));
    store.seed_entitlement(expired);

    let uc = CheckEntitlementUseCase {
        entitlements: store,
        cache: cache(),
    };
    let check = uc
        .execute(&Principal::user("u1"), "u1", "storage")
        .await
        .unwrap();

    assert!(!check.allowed);
    assert!(check.entitlement.is_none());
}

#[tokio::test]
async fn should_forbid_users_reading_each_other() {
    let store = MemoryStore::default();
    store.seed_entitlement(entitlement("u1", "storage", None));
    let check = CheckEntitlementUseCase {
        entitlements: store.clone(),
        cache: cache(),
    };
    let list = ListUserEntitlementsUseCase {
        entitlements: store,
    };
    let intruder = Principal::user("u2");

    let checked = check.execute(&intruder, "u1", "storage").await;
    let listed = list.execute(&intruder, "u1").await;

    assert!(matches!(checked, Err(PaymentServiceError::Forbidden)));
    assert!(matches!(listed, Err(PaymentServiceError::Forbidden)));
}

#[tokio::test]
async fn should_list_entitlements_newest_first_for_services() {
    let store = MemoryStore::default();
    let older = entitlement("u1", "storage", None);
    let mut newer = entitlement("u1", "sync", None);
    newer.granted_at = older.granted_at + chrono::Duration::seconds(5);
    store.seed_entitlement(older);
    store.seed_entitlement(newer);
    store.seed_entitlement(entitlement("u2", "storage", None));

    let uc = ListUserEntitlementsUseCase {
        entitlements: store,
    };
    let rows = uc
        .execute(&Principal::service("gateway"), "u1")
        .await
        .unwrap();

    let features: Vec<&str> = rows.iter().map(|e| e.feature_code.as_str()).collect();
    assert_eq!(features, ["sync", "storage"]);
}
