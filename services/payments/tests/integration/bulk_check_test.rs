use serde_json::json;

use paywell_auth_types::identity::Principal;
use paywell_payments::error::PaymentServiceError;
use paywell_payments::usecase::bulk_check::{BulkCheckEntitlementsUseCase, BulkCheckItem};

use crate::helpers::{MemoryStore, cache, entitlement};

fn item(feature_code: &str) -> BulkCheckItem {
    BulkCheckItem {
        feature_code: feature_code.to_owned(),
        operation: None,
        resource_size: None,
        metadata: None,
    }
}

fn usecase(store: MemoryStore) -> BulkCheckEntitlementsUseCase<
    MemoryStore,
    paywell_payments::infra::cache::EntitlementCacheBackend,
> {
    BulkCheckEntitlementsUseCase {
        entitlements: store,
        cache: cache(),
        upgrade_base_url: "https://paywell.test/upgrade".to_owned(),
    }
}

#[tokio::test]
async fn should_check_mixed_batch_and_summarize() {
    let store = MemoryStore::default();
    store.seed_entitlement(entitlement("u1", "storage", None));
    store.seed_entitlement(entitlement("u1", "reports", Some("fam1")));
    let uc = usecase(store);

    let output = uc
        .execute(
            &Principal::user("u1"),
            "u1",
            vec![
                BulkCheckItem {
                    feature_code: "storage".to_owned(),
                    operation: Some("upload".to_owned()),
                    resource_size: Some(4096),
                    metadata: Some(json!({"screen": "files"})),
                },
                item("sync"),
                item("reports"),
            ],
        )
        .await
        .unwrap();

    let authorized: Vec<bool> = output.results.iter().map(|r| r.authorized).collect();
    assert_eq!(authorized, [true, false, true]);
    assert_eq!(output.results[0].metadata, Some(json!({"screen": "files"})));
    assert_eq!(
        output.results[1].upgrade_url.as_deref(),
        Some("https://paywell.test/upgrade/sync")
    );
    assert_eq!(output.summary.total, 3);
    assert_eq!(output.summary.authorized, 2);
    assert_eq!(output.summary.denied, 1);
    assert_eq!(output.summary.cache_misses, 3);
}

#[tokio::test]
async fn should_answer_repeat_batch_from_cache() {
    let store = MemoryStore::default();
    store.seed_entitlement(entitlement("u1", "storage", None));
    let uc = usecase(store);
    let principal = Principal::user("u1");
    let checks = || vec![item("storage"), item("sync")];

    uc.execute(&principal, "u1", checks()).await.unwrap();
    let repeat = uc.execute(&principal, "u1", checks()).await.unwrap();

    assert_eq!(repeat.summary.cache_hits, 2);
    assert_eq!(repeat.summary.cache_misses, 0);
    assert_eq!(repeat.summary.authorized, 1);
}

#[tokio::test]
async fn should_forbid_bulk_check_for_another_user() {
    let uc = usecase(MemoryStore::default());

    let result = uc
        .execute(&Principal::user("u2"), "u1", vec![item("storage")])
        .await;

    assert!(matches!(result, Err(PaymentServiceError::Forbidden)));
}
