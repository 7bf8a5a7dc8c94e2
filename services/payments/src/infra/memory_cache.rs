use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::domain::repository::EntitlementCache;
use crate::domain::types::{CacheLookup, Entitlement};
use crate::error::PaymentServiceError;

#[derive(Debug, Clone)]
enum Entry {
    Entitlement(Entitlement),
    NotFound,
}

type Entries = HashMap<(String, String), (Entry, Instant)>;

#[derive(Debug)]
struct Store {
    entries: Entries,
    next_sweep: Instant,
}

/// Process-local entitlement cache for deployments without Redis.
///
/// Expiry follows the tokio clock, so paused-time tests can step past TTLs.
/// Expired entries are swept on write at most once per negative TTL, so the
/// map holds at most what was written within the longest TTL.
#[derive(Debug)]
pub struct InMemoryEntitlementCache {
    store: Mutex<Store>,
    ttl: Duration,
    negative_ttl: Duration,
}

impl InMemoryEntitlementCache {
    pub fn new(ttl: Duration, negative_ttl: Duration) -> Self {
        Self {
            store: Mutex::new(Store {
                entries: HashMap::new(),
                next_sweep: Instant::now() + negative_ttl,
            }),
            ttl,
            negative_ttl,
        }
    }

    fn insert(&self, user_id: &str, feature_code: &str, entry: Entry, ttl: Duration) {
        let now = Instant::now();
        let mut store = self.store.lock();
        if now >= store.next_sweep {
            store.entries.retain(|_, (_, expires)| now < *expires);
            store.next_sweep = now + self.negative_ttl;
        }
        store.entries.insert(
            (user_id.to_owned(), feature_code.to_owned()),
            (entry, now + ttl),
        );
    }

    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EntitlementCache for InMemoryEntitlementCache {
    async fn get(
        &self,
        user_id: &str,
        feature_code: &str,
    ) -> Result<CacheLookup, PaymentServiceError> {
        let key = (user_id.to_owned(), feature_code.to_owned());
        let mut store = self.store.lock();
        let entries = &mut store.entries;
        let expired = matches!(entries.get(&key), Some((_, expires)) if Instant::now() >= *expires);
        if expired {
            entries.remove(&key);
            return Ok(CacheLookup::Miss);
        }
        let lookup = match entries.get(&key) {
            None => CacheLookup::Miss,
            Some((Entry::Entitlement(entitlement), _)) => CacheLookup::Hit(entitlement.clone()),
            Some((Entry::NotFound, _)) => CacheLookup::NotFound,
        };
        Ok(lookup)
    }

    async fn set(&self, entitlement: &Entitlement) -> Result<(), PaymentServiceError> {
        self.insert(
            &entitlement.user_id,
            &entitlement.feature_code,
            Entry::Entitlement(entitlement.clone()),
            self.ttl,
        );
        Ok(())
    }

    async fn set_not_found(
        &self,
        user_id: &str,
        feature_code: &str,
    ) -> Result<(), PaymentServiceError> {
        self.insert(user_id, feature_code, Entry::NotFound, self.negative_ttl);
        Ok(())
    }

    async fn delete(&self, user_id: &str, feature_code: &str) -> Result<(), PaymentServiceError> {
        self.store
            .lock()
            .entries
            .remove(&(user_id.to_owned(), feature_code.to_owned()));
        Ok(())
    }
}
