use std::sync::Arc;

use sea_orm::Database;
use tracing::{info, warn};

use paywell_core::resilience::{BreakerRegistry, CircuitBreakerConfig, RetryPolicy};
use paywell_core::tracing::init_tracing;

use paywell_payments::config::PaymentsConfig;
use paywell_payments::domain::repository::EventPublisher;
use paywell_payments::domain::types::{
    BILLING_PROVIDER_BREAKER, CACHE_BREAKER, PUBLISHER_BREAKER,
};
use paywell_payments::infra::billing::HmacBillingProvider;
use paywell_payments::infra::cache::{EntitlementCacheBackend, RedisEntitlementCache};
use paywell_payments::infra::memory_cache::InMemoryEntitlementCache;
use paywell_payments::infra::publisher::{
    EventPublisherBackend, LogPublisher, RedisStreamPublisher,
};
use paywell_payments::router::build_router;
use paywell_payments::state::AppState;
use paywell_payments::worker::{OutboxWorker, OutboxWorkerConfig, WorkerHandle};

#[tokio::main]
async fn main() {
    init_tracing();

    let config = PaymentsConfig::from_env();

    let db = Database::connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let breakers = Arc::new(BreakerRegistry::new());

    let redis = config.redis_url.as_deref().map(|url| {
        deadpool_redis::Config::from_url(url)
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .expect("failed to create redis pool")
    });

    let (cache, publisher) = match &redis {
        Some(pool) => (
            EntitlementCacheBackend::Redis(RedisEntitlementCache {
                pool: pool.clone(),
                guard: breakers.resilience(
                    CACHE_BREAKER,
                    CircuitBreakerConfig::default(),
                    RetryPolicy::none(),
                ),
                ttl: config.entitlement_cache_ttl,
                negative_ttl: config.entitlement_negative_ttl,
            }),
            EventPublisherBackend::RedisStream(RedisStreamPublisher {
                pool: pool.clone(),
                stream: config.outbox_stream.clone(),
            }),
        ),
        None => {
            warn!("REDIS_URL not set; using in-process cache and log publisher");
            (
                EntitlementCacheBackend::Memory(Arc::new(InMemoryEntitlementCache::new(
                    config.entitlement_cache_ttl,
                    config.entitlement_negative_ttl,
                ))),
                EventPublisherBackend::Log(LogPublisher),
            )
        }
    };

    let billing = HmacBillingProvider::new(
        &config.webhook_secret,
        &config.checkout_base_url,
        breakers.resilience(
            BILLING_PROVIDER_BREAKER,
            CircuitBreakerConfig::billing_provider(),
            RetryPolicy::default(),
        ),
    );

    let state = AppState {
        db,
        cache,
        billing,
        breakers: breakers.clone(),
        webhook_tolerance: chrono::Duration::seconds(config.webhook_tolerance.as_secs() as i64),
        upgrade_base_url: config.upgrade_base_url.clone(),
    };

    // Outbox worker
    let worker = OutboxWorker {
        outbox: state.outbox_repo(),
        publisher: publisher.clone(),
        resilience: breakers.resilience(
            PUBLISHER_BREAKER,
            CircuitBreakerConfig::default(),
            RetryPolicy {
                jitter: true,
                ..RetryPolicy::default()
            },
        ),
        config: OutboxWorkerConfig {
            poll_interval: config.outbox_poll_interval,
            batch_size: config.outbox_batch_size,
            max_retries: config.outbox_max_retries,
            requeue_interval: config.outbox_requeue_interval,
        },
    };
    let worker = WorkerHandle::spawn(move |cancel| async move { worker.run(cancel).await });

    // HTTP server
    let router = build_router(state);
    let http_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .expect("failed to bind");

    info!("payments service listening on {http_addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    worker.stop().await;
    if let Err(e) = publisher.close().await {
        warn!(error = %e, "failed to close event publisher");
    }
    info!("payments service stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
