use axum::{
    Json,
    extract::{Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use paywell_auth_types::identity::Principal;

use crate::domain::types::Entitlement;
use crate::error::PaymentServiceError;
use crate::state::AppState;
use crate::usecase::bulk_check::{
    BulkCheckEntitlementsUseCase, BulkCheckItem, BulkCheckResult, BulkCheckSummary,
};
use crate::usecase::entitlement::{CheckEntitlementUseCase, ListUserEntitlementsUseCase};

// ── Response types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EntitlementResponse {
    pub id: uuid::Uuid,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,
    pub feature_code: String,
    pub plan_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    pub status: String,
    #[serde(serialize_with = "paywell_core::serde::to_rfc3339_ms")]
    pub granted_at: DateTime<Utc>,
    #[serde(serialize_with = "paywell_core::serde::to_rfc3339_ms_opt")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_limits: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl From<Entitlement> for EntitlementResponse {
    fn from(e: Entitlement) -> Self {
        Self {
            id: e.id,
            user_id: e.user_id,
            family_id: e.family_id,
            feature_code: e.feature_code,
            plan_id: e.plan_id,
            subscription_id: e.subscription_id,
            status: e.status.as_str().to_owned(),
            granted_at: e.granted_at,
            expires_at: e.expires_at,
            usage_limits: e.usage_limits,
            metadata: e.metadata,
        }
    }
}

#[derive(Serialize)]
pub struct CheckEntitlementResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entitlement: Option<EntitlementResponse>,
}

#[derive(Serialize)]
pub struct BulkCheckResultResponse {
    pub feature_code: String,
    pub authorized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entitlement: Option<EntitlementResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl From<BulkCheckResult> for BulkCheckResultResponse {
    fn from(r: BulkCheckResult) -> Self {
        Self {
            feature_code: r.feature_code,
            authorized: r.authorized,
            entitlement: r.entitlement.map(Into::into),
            reason: r.reason,
            upgrade_url: r.upgrade_url,
            metadata: r.metadata,
        }
    }
}

#[derive(Serialize)]
pub struct BulkCheckSummaryResponse {
    pub total_checks: usize,
    pub authorized: usize,
    pub not_authorized: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub processing_time_ms: u64,
}

impl From<BulkCheckSummary> for BulkCheckSummaryResponse {
    fn from(s: BulkCheckSummary) -> Self {
        Self {
            total_checks: s.total,
            authorized: s.authorized,
            not_authorized: s.denied,
            cache_hits: s.cache_hits,
            cache_misses: s.cache_misses,
            processing_time_ms: s.processing_time_ms,
        }
    }
}

#[derive(Serialize)]
pub struct BulkCheckResponse {
    pub user_id: String,
    pub results: Vec<BulkCheckResultResponse>,
    pub summary: BulkCheckSummaryResponse,
}

// ── Request types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CheckEntitlementQuery {
    #[serde(default)]
    pub feature_code: String,
    /// Defaults to the caller.
    pub user_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ListEntitlementsQuery {
    pub user_id: Option<String>,
}

#[derive(Deserialize)]
pub struct BulkCheckItemRequest {
    #[serde(default)]
    pub feature_code: String,
    pub operation: Option<String>,
    pub resource_size: Option<i64>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Deserialize)]
pub struct BulkCheckRequest {
    pub user_id: Option<String>,
    #[serde(default)]
    pub checks: Vec<BulkCheckItemRequest>,
}

// ── GET /entitlements/check ──────────────────────────────────────────────────

pub async fn check_entitlement(
    principal: Principal,
    State(state): State<AppState>,
    Query(query): Query<CheckEntitlementQuery>,
) -> Result<Json<CheckEntitlementResponse>, PaymentServiceError> {
    let user_id = query
        .user_id
        .unwrap_or_else(|| principal.user_id.clone());
    let usecase = CheckEntitlementUseCase {
        entitlements: state.entitlement_repo(),
        cache: state.cache.clone(),
    };
    let check = usecase
        .execute(&principal, &user_id, &query.feature_code)
        .await?;
    Ok(Json(CheckEntitlementResponse {
        allowed: check.allowed,
        entitlement: check.entitlement.map(Into::into),
    }))
}

// ── GET /entitlements ────────────────────────────────────────────────────────

pub async fn list_entitlements(
    principal: Principal,
    State(state): State<AppState>,
    Query(query): Query<ListEntitlementsQuery>,
) -> Result<Json<Vec<EntitlementResponse>>, PaymentServiceError> {
    let user_id = query
        .user_id
        .unwrap_or_else(|| principal.user_id.clone());
    let usecase = ListUserEntitlementsUseCase {
        entitlements: state.entitlement_repo(),
    };
    let entitlements = usecase.execute(&principal, &user_id).await?;
    Ok(Json(entitlements.into_iter().map(Into::into).collect()))
}

// ── POST /entitlements/bulk-check ────────────────────────────────────────────

pub async fn bulk_check_entitlements(
    principal: Principal,
    State(state): State<AppState>,
    Json(body): Json<BulkCheckRequest>,
) -> Result<Json<BulkCheckResponse>, PaymentServiceError> {
    let user_id = body.user_id.unwrap_or_else(|| principal.user_id.clone());
    let checks = body
        .checks
        .into_iter()
        .map(|c| BulkCheckItem {
            feature_code: c.feature_code,
            operation: c.operation,
            resource_size: c.resource_size,
            metadata: c.metadata,
        })
        .collect();
    let usecase = BulkCheckEntitlementsUseCase {
        entitlements: state.entitlement_repo(),
        cache: state.cache.clone(),
        upgrade_base_url: state.upgrade_base_url.clone(),
    };
    let output = usecase.execute(&principal, &user_id, checks).await?;
    Ok(Json(BulkCheckResponse {
        user_id,
        results: output.results.into_iter().map(Into::into).collect(),
        summary: output.summary.into(),
    }))
}
