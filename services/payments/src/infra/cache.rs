use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use deadpool_redis::Pool;
use deadpool_redis::redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use paywell_core::resilience::Resilience;

use crate::domain::repository::EntitlementCache;
use crate::domain::types::{CacheLookup, Entitlement};
use crate::error::PaymentServiceError;
use crate::infra::memory_cache::InMemoryEntitlementCache;

fn entitlement_key(user_id: &str, feature_code: &str) -> String {
    format!("entl:{user_id}:{feature_code}")
}

/// Stored cache value. A `not_found` entry is the negative marker.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum CachedEntry {
    Entitlement { entitlement: Entitlement },
    NotFound { cached_at: DateTime<Utc> },
}

#[derive(Clone)]
pub struct RedisEntitlementCache {
    pub pool: Pool,
    pub guard: Resilience,
    pub ttl: Duration,
    pub negative_ttl: Duration,
}

impl RedisEntitlementCache {
    async fn write(&self, key: &str, entry: &CachedEntry, ttl: Duration) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(entry).context("encode cache entry")?;
        let bytes = bytes.as_slice();
        self.guard
            .run(|| async move {
                let mut conn = self.pool.get().await.context("redis pool")?;
                let (): () = conn
                    .set_ex(key, bytes, ttl.as_secs().max(1))
                    .await
                    .context("redis SETEX")?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

impl EntitlementCache for RedisEntitlementCache {
    async fn get(
        &self,
        user_id: &str,
        feature_code: &str,
    ) -> Result<CacheLookup, PaymentServiceError> {
        let key = entitlement_key(user_id, feature_code);
        let key = key.as_str();
        let value: Option<Vec<u8>> = self
            .guard
            .run(|| async move {
                let mut conn = self.pool.get().await.context("redis pool")?;
                let value: Option<Vec<u8>> = conn.get(key).await.context("redis GET")?;
                Ok(value)
            })
            .await?;

        let Some(bytes) = value else {
            return Ok(CacheLookup::Miss);
        };
        match serde_json::from_slice::<CachedEntry>(&bytes) {
            Ok(CachedEntry::Entitlement { entitlement }) => Ok(CacheLookup::Hit(entitlement)),
            Ok(CachedEntry::NotFound { .. }) => Ok(CacheLookup::NotFound),
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding undecodable cache entry");
                Ok(CacheLookup::Miss)
            }
        }
    }

    async fn set(&self, entitlement: &Entitlement) -> Result<(), PaymentServiceError> {
        let key = entitlement_key(&entitlement.user_id, &entitlement.feature_code);
        let entry = CachedEntry::Entitlement {
            entitlement: entitlement.clone(),
        };
        self.write(&key, &entry, self.ttl).await?;
        Ok(())
    }

    async fn set_not_found(
        &self,
        user_id: &str,
        feature_code: &str,
    ) -> Result<(), PaymentServiceError> {
        let key = entitlement_key(user_id, feature_code);
        let entry = CachedEntry::NotFound {
            cached_at: Utc::now(),
        };
        self.write(&key, &entry, self.negative_ttl).await?;
        Ok(())
    }

    async fn delete(&self, user_id: &str, feature_code: &str) -> Result<(), PaymentServiceError> {
        let key = entitlement_key(user_id, feature_code);
        let key = key.as_str();
        self.guard
            .run(|| async move {
                let mut conn = self.pool.get().await.context("redis pool")?;
                let (): () = conn.del(key).await.context("redis DEL")?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

/// Cache selected at startup: Redis when configured, otherwise in-process.
#[derive(Clone)]
pub enum EntitlementCacheBackend {
    Redis(RedisEntitlementCache),
    Memory(Arc<InMemoryEntitlementCache>),
}

impl EntitlementCache for EntitlementCacheBackend {
    async fn get(
        &self,
        user_id: &str,
        feature_code: &str,
    ) -> Result<CacheLookup, PaymentServiceError> {
        match self {
            Self::Redis(cache) => cache.get(user_id, feature_code).await,
            Self::Memory(cache) => cache.get(user_id, feature_code).await,
        }
    }

    async fn set(&self, entitlement: &Entitlement) -> Result<(), PaymentServiceError> {
        match self {
            Self::Redis(cache) => cache.set(entitlement).await,
            Self::Memory(cache) => cache.set(entitlement).await,
        }
    }

    async fn set_not_found(
        &self,
        user_id: &str,
        feature_code: &str,
    ) -> Result<(), PaymentServiceError> {
        match self {
            Self::Redis(cache) => cache.set_not_found(user_id, feature_code).await,
            Self::Memory(cache) => cache.set_not_found(user_id, feature_code).await,
        }
    }

    async fn delete(&self, user_id: &str, feature_code: &str) -> Result<(), PaymentServiceError> {
        match self {
            Self::Redis(cache) => cache.delete(user_id, feature_code).await,
            Self::Memory(cache) => cache.delete(user_id, feature_code).await,
        }
    }
}
