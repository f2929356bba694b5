// OpenAPI document for the public API

use axum::{extract::State, Json};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::app::AppState;
use crate::handlers::{affiliates, payouts, usage, webhooks};
use crate::models::{affiliate, usage as usage_models};
use crate::utils::api_errors::ApiErrorResponse;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Chefly Backend API",
        description = "AI usage budgets and the affiliate commission pipeline",
        version = "1.0.0"
    ),
    paths(
        usage::check_usage,
        usage::record_usage,
        usage::current_usage,
        usage::usage_history,
        affiliates::track_click,
        affiliates::create_affiliate,
        affiliates::get_profile,
        affiliates::update_payout_settings,
        affiliates::start_connect,
        affiliates::connect_status,
        affiliates::list_referrals,
        affiliates::list_sales,
        affiliates::list_payouts,
        payouts::request_payout,
        webhooks::stripe_webhook,
    ),
    components(schemas(
        ApiErrorResponse,
        usage_models::CheckUsageRequest,
        usage_models::BudgetCheckResponse,
        usage_models::RecordUsageRequest,
        usage_models::RecordUsageResponse,
        usage_models::UsageRecord,
        usage_models::OperationType,
        affiliate::TrackClickRequest,
        affiliate::TrackClickResponse,
        affiliate::CreateAffiliateRequest,
        affiliate::AffiliateProfileResponse,
        affiliate::AffiliateTier,
        affiliate::AccountStatus,
        affiliate::PayoutMethod,
        affiliate::UpdatePayoutSettingsRequest,
        affiliate::ConnectOnboardingResponse,
        affiliate::ConnectStatusResponse,
        affiliate::Referral,
        affiliate::Sale,
        affiliate::Payout,
        affiliate::PayoutRequest,
        affiliate::PayoutResponse,
        webhooks::WebhookAck,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "Usage", description = "Monthly AI budget checks and usage recording"),
        (name = "Affiliates", description = "Click attribution and affiliate profiles"),
        (name = "Payouts", description = "Commission payouts through Stripe Connect"),
        (name = "Webhooks", description = "Stripe event intake")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearerAuth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Serve OpenAPI JSON specification at /openapi.json
pub async fn serve_openapi_spec(
    State(_state): State<AppState>,
) -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_core_paths() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/v1/usage/check",
            "/api/v1/usage/record",
            "/api/v1/affiliates/click",
            "/api/v1/affiliates/me/payouts",
            "/api/v1/webhooks/stripe",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
