use futures::{StreamExt as _, stream};
use tokio::time::Instant;
use tracing::{debug, error, info};

use paywell_auth_types::identity::Principal;

use crate::domain::repository::{EntitlementCache, EntitlementRepository};
use crate::domain::types::{BULK_CHECK_CONCURRENCY, BULK_CHECK_MAX_ITEMS, Entitlement};
use crate::error::PaymentServiceError;
use crate::usecase::entitlement::{DenyReason, Resolution, authorize, resolve};

#[derive(Debug, Clone)]
pub struct BulkCheckItem {
    pub feature_code: String,
    /// What the caller intends to do with the feature, e.g. `upload`. Keys
    /// the entitlement's `usage_limits`.
    pub operation: Option<String>,
    /// Size of the resource the operation touches, checked against the
    /// operation's `quota_limit`.
    pub resource_size: Option<i64>,
    /// Caller context, echoed back on authorized results.
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkCheckResult {
    pub feature_code: String,
    pub authorized: bool,
    pub entitlement: Option<Entitlement>,
    pub reason: Option<String>,
    pub upgrade_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkCheckSummary {
    pub total: usize,
    pub authorized: usize,
    pub denied: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkCheckOutput {
    pub results: Vec<BulkCheckResult>,
    pub summary: BulkCheckSummary,
}

/// Where a single item's answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Cache,
    Repository,
    Skipped,
}

pub struct BulkCheckEntitlementsUseCase<E: EntitlementRepository, C: EntitlementCache> {
    pub entitlements: E,
    pub cache: C,
    pub upgrade_base_url: String,
}

impl<E: EntitlementRepository, C: EntitlementCache> BulkCheckEntitlementsUseCase<E, C> {
    /// Check every item for `user_id`, at most ten at a time, returning
    /// results in request order. Per-item failures become denied results.
    pub async fn execute(
        &self,
        principal: &Principal,
        user_id: &str,
        checks: Vec<BulkCheckItem>,
    ) -> Result<BulkCheckOutput, PaymentServiceError> {
        authorize(principal, user_id)?;
        if checks.is_empty() || checks.len() > BULK_CHECK_MAX_ITEMS {
            return Err(PaymentServiceError::InvalidRequest(format!(
                "checks must contain between 1 and {BULK_CHECK_MAX_ITEMS} items"
            )));
        }

        let started = Instant::now();
        let outcomes: Vec<(BulkCheckResult, Lookup)> = stream::iter(checks)
            .map(|item| self.check_one(user_id, item))
            .buffered(BULK_CHECK_CONCURRENCY)
            .collect()
            .await;

        let mut summary = BulkCheckSummary {
            total: outcomes.len(),
            ..BulkCheckSummary::default()
        };
        let mut results = Vec::with_capacity(outcomes.len());
        for (result, lookup) in outcomes {
            if result.authorized {
                summary.authorized += 1;
            } else {
                summary.denied += 1;
            }
            match lookup {
                Lookup::Cache => summary.cache_hits += 1,
                Lookup::Repository => summary.cache_misses += 1,
                Lookup::Skipped => {}
            }
            results.push(result);
        }
        summary.processing_time_ms = started.elapsed().as_millis() as u64;

        info!(
            user_id,
            total = summary.total,
            authorized = summary.authorized,
            denied = summary.denied,
            processing_time_ms = summary.processing_time_ms,
            "bulk entitlement check completed"
        );
        Ok(BulkCheckOutput { results, summary })
    }

    async fn check_one(&self, user_id: &str, item: BulkCheckItem) -> (BulkCheckResult, Lookup) {
        let feature_code = item.feature_code.trim().to_owned();
        debug!(
            user_id,
            feature_code = %feature_code,
            operation = item.operation.as_deref(),
            resource_size = item.resource_size,
            "checking entitlement"
        );
        if feature_code.is_empty() {
            return (
                self.denied(feature_code, "feature_code is required"),
                Lookup::Skipped,
            );
        }

        match resolve(&self.entitlements, &self.cache, user_id, &feature_code).await {
            Ok(Resolution::Granted {
                entitlement,
                from_cache,
            }) if exceeds_quota(&entitlement, &item) => {
                info!(
                    user_id,
                    feature_code = %feature_code,
                    operation = item.operation.as_deref(),
                    resource_size = item.resource_size,
                    "bulk entitlement check over quota"
                );
                (
                    self.denied(feature_code, "Quota exceeded"),
                    lookup_of(from_cache),
                )
            }
            Ok(Resolution::Granted {
                entitlement,
                from_cache,
            }) => (
                BulkCheckResult {
                    feature_code,
                    authorized: true,
                    entitlement: Some(entitlement),
                    reason: None,
                    upgrade_url: None,
                    metadata: item.metadata,
                },
                lookup_of(from_cache),
            ),
            Ok(Resolution::Denied { reason, from_cache }) => {
                let reason = match reason {
                    DenyReason::NotFound => "No active entitlement found",
                    DenyReason::ExpiredOrInactive => "Entitlement expired or inactive",
                };
                (self.denied(feature_code, reason), lookup_of(from_cache))
            }
            Err(e) => {
                error!(user_id, feature_code = %feature_code, error = %e, "bulk entitlement check failed");
                (
                    self.denied(feature_code, "Internal error checking entitlement"),
                    Lookup::Repository,
                )
            }
        }
    }

    fn denied(&self, feature_code: String, reason: &str) -> BulkCheckResult {
        let upgrade_url = (!feature_code.is_empty())
            .then(|| format!("{}/{feature_code}", self.upgrade_base_url.trim_end_matches('/')));
        BulkCheckResult {
            feature_code,
            authorized: false,
            entitlement: None,
            reason: Some(reason.to_owned()),
            upgrade_url,
            metadata: None,
        }
    }
}

/// `usage_limits` is keyed by operation, e.g. `{"upload": {"quota_limit": 1048576}}`.
/// Operations without a limit are unrestricted.
fn quota_limit(entitlement: &Entitlement, operation: &str) -> Option<i64> {
    let limit = entitlement
        .usage_limits
        .as_ref()?
        .get(operation)?
        .get("quota_limit")?;
    limit.as_i64().or_else(|| limit.as_f64().map(|v| v as i64))
}

fn exceeds_quota(entitlement: &Entitlement, item: &BulkCheckItem) -> bool {
    match (item.operation.as_deref(), item.resource_size) {
        (Some(operation), Some(size)) => {
            quota_limit(entitlement, operation).is_some_and(|limit| size > limit)
        }
        _ => false,
    }
}

fn lookup_of(from_cache: bool) -> Lookup {
    if from_cache {
        Lookup::Cache
    } else {
        Lookup::Repository
    }
}
