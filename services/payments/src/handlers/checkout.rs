use axum::{Json, extract::State, http::StatusCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use paywell_auth_types::identity::Principal;

use crate::error::PaymentServiceError;
use crate::state::AppState;
use crate::usecase::checkout::{CreateCheckoutSessionInput, CreateCheckoutSessionUseCase};

#[derive(Deserialize)]
pub struct CreateCheckoutSessionRequest {
    #[serde(default)]
    pub plan_id: String,
    pub family_id: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Serialize)]
pub struct CheckoutSessionResponse {
    pub session_id: String,
    pub url: String,
    #[serde(serialize_with = "paywell_core::serde::to_rfc3339_ms")]
    pub expires_at: DateTime<Utc>,
}

// ── POST /checkout/sessions ──────────────────────────────────────────────────

pub async fn create_checkout_session(
    principal: Principal,
    State(state): State<AppState>,
    Json(body): Json<CreateCheckoutSessionRequest>,
) -> Result<(StatusCode, Json<CheckoutSessionResponse>), PaymentServiceError> {
    let usecase = CreateCheckoutSessionUseCase {
        plans: state.plan_repo(),
        billing: state.billing.clone(),
    };
    let session = usecase
        .execute(
            &principal,
            CreateCheckoutSessionInput {
                plan_id: body.plan_id,
                family_id: body.family_id,
                success_url: body.success_url,
                cancel_url: body.cancel_url,
            },
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CheckoutSessionResponse {
            session_id: session.session_id,
            url: session.url,
            expires_at: session.expires_at,
        }),
    ))
}
