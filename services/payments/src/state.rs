use std::sync::Arc;

use axum::extract::FromRef;
use sea_orm::DatabaseConnection;

use paywell_core::resilience::{BreakerRegistry, CircuitBreakerConfig, Resilience, RetryPolicy};

use crate::domain::types::DATABASE_BREAKER;
use crate::infra::billing::HmacBillingProvider;
use crate::infra::cache::EntitlementCacheBackend;
use crate::infra::db::{
    DbEntitlementRepository, DbOutboxRepository, DbPaymentRepository, DbPlanRepository,
    DbWebhookEventRepository,
};

/// Shared application state passed to every handler via axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub cache: EntitlementCacheBackend,
    pub billing: HmacBillingProvider,
    pub breakers: Arc<BreakerRegistry>,
    pub webhook_tolerance: chrono::Duration,
    pub upgrade_base_url: String,
}

impl AppState {
    fn db_guard(&self) -> Resilience {
        self.breakers.resilience(
            DATABASE_BREAKER,
            CircuitBreakerConfig::default(),
            RetryPolicy::default(),
        )
    }

    pub fn plan_repo(&self) -> DbPlanRepository {
        DbPlanRepository {
            db: self.db.clone(),
            guard: self.db_guard(),
        }
    }

    pub fn entitlement_repo(&self) -> DbEntitlementRepository {
        DbEntitlementRepository {
            db: self.db.clone(),
            guard: self.db_guard(),
        }
    }

    pub fn payment_repo(&self) -> DbPaymentRepository {
        DbPaymentRepository {
            db: self.db.clone(),
            guard: self.db_guard(),
        }
    }

    pub fn webhook_event_repo(&self) -> DbWebhookEventRepository {
        DbWebhookEventRepository {
            db: self.db.clone(),
            guard: self.db_guard(),
        }
    }

    pub fn outbox_repo(&self) -> DbOutboxRepository {
        DbOutboxRepository {
            db: self.db.clone(),
            guard: self.db_guard(),
        }
    }
}

impl FromRef<AppState> for Arc<BreakerRegistry> {
    fn from_ref(state: &AppState) -> Self {
        state.breakers.clone()
    }
}
