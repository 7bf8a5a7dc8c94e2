use tracing::warn;

use paywell_auth_types::identity::Principal;

use crate::domain::repository::{EntitlementCache, EntitlementRepository};
use crate::domain::types::{CacheLookup, Entitlement};
use crate::error::PaymentServiceError;

// ── Resolution ───────────────────────────────────────────────────────────────

/// Why a check came back negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NotFound,
    ExpiredOrInactive,
}

/// Outcome of resolving one `(user, feature)` pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Granted {
        entitlement: Entitlement,
        from_cache: bool,
    },
    Denied {
        reason: DenyReason,
        from_cache: bool,
    },
}

impl Resolution {
    pub fn from_cache(&self) -> bool {
        match self {
            Self::Granted { from_cache, .. } | Self::Denied { from_cache, .. } => *from_cache,
        }
    }
}

/// Cache first, then the user's own rows, then any valid family-shared row
/// for the feature. Negative answers are cached briefly. Cache failures
/// degrade to repository reads.
pub(crate) async fn resolve<E, C>(
    entitlements: &E,
    cache: &C,
    user_id: &str,
    feature_code: &str,
) -> Result<Resolution, PaymentServiceError>
where
    E: EntitlementRepository,
    C: EntitlementCache,
{
    match cache.get(user_id, feature_code).await {
        Ok(CacheLookup::Hit(entitlement)) if entitlement.is_valid() => {
            return Ok(Resolution::Granted {
                entitlement,
                from_cache: true,
            });
        }
        Ok(CacheLookup::Hit(_)) => {
            if let Err(e) = cache.delete(user_id, feature_code).await {
                warn!(user_id, feature_code, error = %e, "failed to evict stale entitlement");
            }
        }
        Ok(CacheLookup::NotFound) => {
            return Ok(Resolution::Denied {
                reason: DenyReason::NotFound,
                from_cache: true,
            });
        }
        Ok(CacheLookup::Miss) => {}
        Err(e) => warn!(user_id, feature_code, error = %e, "entitlement cache read failed"),
    }

    let mut reason = DenyReason::NotFound;
    match entitlements.find_latest(user_id, feature_code).await? {
        Some(entitlement) if entitlement.is_valid() => {
            store(cache, &entitlement).await;
            return Ok(Resolution::Granted {
                entitlement,
                from_cache: false,
            });
        }
        Some(_) => reason = DenyReason::ExpiredOrInactive,
        None => {}
    }

    let shared = entitlements
        .list_by_user(user_id)
        .await?
        .into_iter()
        .find(|e| e.feature_code == feature_code && e.is_family_shared() && e.is_valid());
    if let Some(entitlement) = shared {
        store(cache, &entitlement).await;
        return Ok(Resolution::Granted {
            entitlement,
            from_cache: false,
        });
    }

    if let Err(e) = cache.set_not_found(user_id, feature_code).await {
        warn!(user_id, feature_code, error = %e, "failed to cache negative lookup");
    }
    Ok(Resolution::Denied {
        reason,
        from_cache: false,
    })
}

async fn store<C: EntitlementCache>(cache: &C, entitlement: &Entitlement) {
    if let Err(e) = cache.set(entitlement).await {
        warn!(
            user_id = %entitlement.user_id,
            feature_code = %entitlement.feature_code,
            error = %e,
            "failed to cache entitlement"
        );
    }
}

pub(crate) fn authorize(principal: &Principal, user_id: &str) -> Result<(), PaymentServiceError> {
    if principal.can_access(user_id) {
        Ok(())
    } else {
        Err(PaymentServiceError::Forbidden)
    }
}

// ── CheckEntitlement ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct EntitlementCheck {
    pub allowed: bool,
    pub entitlement: Option<Entitlement>,
    pub from_cache: bool,
}

pub struct CheckEntitlementUseCase<E: EntitlementRepository, C: EntitlementCache> {
    pub entitlements: E,
    pub cache: C,
}

impl<E: EntitlementRepository, C: EntitlementCache> CheckEntitlementUseCase<E, C> {
    pub async fn execute(
        &self,
        principal: &Principal,
        user_id: &str,
        feature_code: &str,
    ) -> Result<EntitlementCheck, PaymentServiceError> {
        authorize(principal, user_id)?;
        if feature_code.trim().is_empty() {
            return Err(PaymentServiceError::InvalidRequest(
                "feature_code is required".to_owned(),
            ));
        }

        let resolution = resolve(&self.entitlements, &self.cache, user_id, feature_code).await?;
        let from_cache = resolution.from_cache();
        Ok(match resolution {
            Resolution::Granted { entitlement, .. } => EntitlementCheck {
                allowed: true,
                entitlement: Some(entitlement),
                from_cache,
            },
            Resolution::Denied { .. } => EntitlementCheck {
                allowed: false,
                entitlement: None,
                from_cache,
            },
        })
    }
}

// ── ListUserEntitlements ─────────────────────────────────────────────────────

pub struct ListUserEntitlementsUseCase<E: EntitlementRepository> {
    pub entitlements: E,
}

impl<E: EntitlementRepository> ListUserEntitlementsUseCase<E> {
    pub async fn execute(
        &self,
        principal: &Principal,
        user_id: &str,
    ) -> Result<Vec<Entitlement>, PaymentServiceError> {
        authorize(principal, user_id)?;
        self.entitlements.list_by_user(user_id).await
    }
}
