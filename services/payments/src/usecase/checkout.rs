use paywell_auth_types::identity::Principal;

use crate::domain::repository::{BillingProvider, PlanRepository};
use crate::domain::types::{CheckoutSession, CheckoutSessionRequest};
use crate::error::PaymentServiceError;

pub struct CreateCheckoutSessionInput {
    pub plan_id: String,
    pub family_id: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

pub struct CreateCheckoutSessionUseCase<P: PlanRepository, B: BillingProvider> {
    pub plans: P,
    pub billing: B,
}

impl<P: PlanRepository, B: BillingProvider> CreateCheckoutSessionUseCase<P, B> {
    /// Open a hosted checkout for the caller. Inactive plans are treated as
    /// missing.
    pub async fn execute(
        &self,
        principal: &Principal,
        input: CreateCheckoutSessionInput,
    ) -> Result<CheckoutSession, PaymentServiceError> {
        if input.plan_id.trim().is_empty() {
            return Err(PaymentServiceError::InvalidRequest(
                "plan_id is required".to_owned(),
            ));
        }
        let plan = self
            .plans
            .find_by_id(&input.plan_id)
            .await?
            .filter(|plan| plan.active)
            .ok_or(PaymentServiceError::PlanNotFound)?;

        let request = CheckoutSessionRequest {
            plan,
            user_id: principal.user_id.clone(),
            family_id: input.family_id,
            success_url: input.success_url,
            cancel_url: input.cancel_url,
        };
        self.billing.create_checkout_session(&request).await
    }
}
