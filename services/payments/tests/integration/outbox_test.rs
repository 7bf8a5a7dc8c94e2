use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use paywell_core::resilience::{BreakerRegistry, CircuitBreakerConfig, RetryPolicy};
use paywell_domain::event::{ENTITLEMENT_GRANTED, OutboxStatus, PAYMENT_COMPLETED};
use paywell_payments::domain::types::{OutboxEvent, PUBLISHER_BREAKER};
use paywell_payments::usecase::webhook::ProcessWebhookInput;
use paywell_payments::worker::{BatchReport, OutboxWorker, OutboxWorkerConfig, WorkerHandle};
use paywell_testing::webhook::{checkout_completed, signed};

use crate::helpers::{
    MemoryStore, RecordingPublisher, SECRET, cache, entitlement, plan, webhook_usecase,
};

fn worker(
    store: &MemoryStore,
    publisher: &RecordingPublisher,
    breaker: CircuitBreakerConfig,
    config: OutboxWorkerConfig,
) -> OutboxWorker<MemoryStore, RecordingPublisher> {
    let registry = BreakerRegistry::new();
    OutboxWorker {
        outbox: store.clone(),
        publisher: publisher.clone(),
        resilience: registry.resilience(PUBLISHER_BREAKER, breaker, RetryPolicy::none()),
        config,
    }
}

fn seed(store: &MemoryStore, count: usize) {
    for n in 0..count {
        let grant = entitlement("u1", &format!("feature_{n}"), None);
        store.seed_outbox(OutboxEvent::entitlement(
            ENTITLEMENT_GRANTED,
            &grant,
            format!("seed:{n}"),
        ));
    }
}

#[tokio::test]
async fn should_publish_in_order_and_retry_failed_row_next_cycle() {
    let store = MemoryStore::with_plans(vec![plan("p1", &["storage", "sync"])]);
    let (payload, signature) = signed(SECRET, &checkout_completed("evt_1", "u1", "p1"));
    webhook_usecase(&store, &cache())
        .execute(ProcessWebhookInput {
            payload: Bytes::from(payload),
            signature,
            timestamp: None,
        })
        .await
        .unwrap();

    let publisher = RecordingPublisher::default();
    let payment_row = store.outbox_of_type(PAYMENT_COMPLETED)[0].id;
    publisher.reject(payment_row);
    let worker = worker(
        &store,
        &publisher,
        CircuitBreakerConfig::default(),
        OutboxWorkerConfig::default(),
    );

    let report = worker.process_batch(&CancellationToken::new()).await.unwrap();

    assert_eq!(
        report,
        BatchReport {
            claimed: 3,
            published: 2,
            failed: 1,
            deferred: 0,
        }
    );
    let features: Vec<String> = publisher
        .published()
        .iter()
        .map(|e| e.data["feature_code"].as_str().unwrap_or_default().to_owned())
        .collect();
    assert_eq!(features, ["storage", "sync"]);

    let failed = store
        .outbox()
        .into_iter()
        .find(|r| r.id == payment_row)
        .unwrap();
    assert_eq!(failed.status, OutboxStatus::Failed);
    assert_eq!(failed.retry_count, 1);
    assert!(failed.error_message.unwrap().contains("broker rejected"));

    // Failed rows wait for the requeue sweep.
    let idle = worker.process_batch(&CancellationToken::new()).await.unwrap();
    assert_eq!(idle.claimed, 0);

    publisher.accept_all();
    assert_eq!(worker.requeue_failed().await.unwrap(), 1);
    let retry = worker.process_batch(&CancellationToken::new()).await.unwrap();

    assert_eq!(retry.published, 1);
    assert!(
        store
            .outbox()
            .iter()
            .all(|r| r.status == OutboxStatus::Published)
    );
    assert_eq!(publisher.published().len(), 3);
}

#[tokio::test]
async fn should_stop_requeueing_after_max_retries() {
    let store = MemoryStore::default();
    seed(&store, 1);
    let publisher = RecordingPublisher::rejecting_all();
    let worker = worker(
        &store,
        &publisher,
        CircuitBreakerConfig::default(),
        OutboxWorkerConfig {
            max_retries: 2,
            ..OutboxWorkerConfig::default()
        },
    );
    let cancel = CancellationToken::new();

    worker.process_batch(&cancel).await.unwrap();
    assert_eq!(worker.requeue_failed().await.unwrap(), 1);
    worker.process_batch(&cancel).await.unwrap();
    assert_eq!(worker.requeue_failed().await.unwrap(), 0);

    let outbox = store.outbox();
    let row = &outbox[0];
    assert_eq!(row.status, OutboxStatus::Failed);
    assert_eq!(row.retry_count, 2);
}

#[tokio::test]
async fn should_leave_rows_pending_while_publisher_breaker_is_open() {
    let store = MemoryStore::default();
    seed(&store, 3);
    let publisher = RecordingPublisher::rejecting_all();
    let worker = worker(
        &store,
        &publisher,
        CircuitBreakerConfig {
            max_failures: 1,
            ..CircuitBreakerConfig::default()
        },
        OutboxWorkerConfig::default(),
    );

    let report = worker.process_batch(&CancellationToken::new()).await.unwrap();

    assert_eq!(
        report,
        BatchReport {
            claimed: 3,
            published: 0,
            failed: 1,
            deferred: 2,
        }
    );
    let statuses: Vec<OutboxStatus> = store.outbox().iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        [
            OutboxStatus::Failed,
            OutboxStatus::Pending,
            OutboxStatus::Pending
        ]
    );

    // Nothing is claimed again until the breaker admits a trial call.
    let claims = store.claims();
    let idle = worker.process_batch(&CancellationToken::new()).await.unwrap();
    assert_eq!(idle, BatchReport::default());
    assert_eq!(store.claims(), claims);
}

#[tokio::test(start_paused = true)]
async fn should_resume_claiming_once_publisher_breaker_timeout_passes() {
    let store = MemoryStore::default();
    seed(&store, 2);
    let publisher = RecordingPublisher::default();
    publisher.reject(store.outbox()[0].id);
    let worker = worker(
        &store,
        &publisher,
        CircuitBreakerConfig {
            max_failures: 1,
            timeout: Duration::from_secs(30),
            ..CircuitBreakerConfig::default()
        },
        OutboxWorkerConfig::default(),
    );
    let cancel = CancellationToken::new();

    let first = worker.process_batch(&cancel).await.unwrap();
    assert_eq!((first.failed, first.deferred), (1, 1));

    tokio::time::advance(Duration::from_secs(30)).await;
    let trial = worker.process_batch(&cancel).await.unwrap();

    assert_eq!(trial.claimed, 1);
    assert_eq!(trial.published, 1);
    assert_eq!(publisher.published().len(), 1);
}

#[tokio::test]
async fn should_drain_pending_rows_on_shutdown() {
    let store = MemoryStore::default();
    seed(&store, 2);
    let publisher = RecordingPublisher::default();
    let worker = worker(
        &store,
        &publisher,
        CircuitBreakerConfig::default(),
        OutboxWorkerConfig::default(),
    );

    let handle = WorkerHandle::spawn(move |cancel| async move { worker.run(cancel).await });
    handle.stop().await;

    assert_eq!(publisher.published().len(), 2);
    assert!(
        store
            .outbox()
            .iter()
            .all(|r| r.status == OutboxStatus::Published)
    );
}
