use std::time::Duration;

/// Payments service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Redis connection URL. Unset means in-process cache and log-only publishing.
    pub redis_url: Option<String>,
    /// Shared secret the billing provider signs webhooks with.
    pub webhook_secret: String,
    /// TCP port to listen on (default 3120). Env var: `PAYMENTS_PORT`.
    pub port: u16,
    /// Accepted clock skew for webhook timestamps (default 300s).
    pub webhook_tolerance: Duration,
    pub entitlement_cache_ttl: Duration,
    pub entitlement_negative_ttl: Duration,
    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: u64,
    pub outbox_max_retries: i32,
    pub outbox_requeue_interval: Duration,
    /// Redis stream events are appended to.
    pub outbox_stream: String,
    /// Prefix for upgrade links returned on denied bulk checks.
    pub upgrade_base_url: String,
    /// Prefix for hosted checkout session URLs.
    pub checkout_base_url: String,
}

impl PaymentsConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").expect("DATABASE_URL"),
            redis_url: std::env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
            webhook_secret: std::env::var("WEBHOOK_SECRET").expect("WEBHOOK_SECRET"),
            port: env_or("PAYMENTS_PORT", 3120),
            webhook_tolerance: Duration::from_secs(env_or("WEBHOOK_TOLERANCE_SECS", 300)),
            entitlement_cache_ttl: Duration::from_secs(env_or("ENTITLEMENT_CACHE_TTL_SECS", 120)),
            entitlement_negative_ttl: Duration::from_secs(env_or(
                "ENTITLEMENT_NEGATIVE_TTL_SECS",
                10,
            )),
            outbox_poll_interval: Duration::from_millis(env_or("OUTBOX_POLL_INTERVAL_MS", 5000)),
            outbox_batch_size: env_or("OUTBOX_BATCH_SIZE", 10),
            outbox_max_retries: env_or("OUTBOX_MAX_RETRIES", 5),
            outbox_requeue_interval: Duration::from_secs(env_or(
                "OUTBOX_REQUEUE_INTERVAL_SECS",
                60,
            )),
            outbox_stream: std::env::var("OUTBOX_STREAM")
                .unwrap_or_else(|_| "paywell:events".to_owned()),
            upgrade_base_url: std::env::var("UPGRADE_BASE_URL")
                .unwrap_or_else(|_| "https://paywell.app/upgrade".to_owned()),
            checkout_base_url: std::env::var("CHECKOUT_BASE_URL")
                .unwrap_or_else(|_| "https://checkout.paywell.app/session".to_owned()),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
