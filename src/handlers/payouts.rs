// Affiliate payout request endpoint

use axum::{
    extract::{rejection::JsonRejection, Extension, State},
    Json,
};

use crate::{
    app::AppState,
    middleware::auth::AuthenticatedUser,
    models::affiliate::{PayoutRequest, PayoutResponse},
    utils::api_errors::{ApiErrorResponse, ApiResult},
};

/// Transfer part of the pending balance to the caller's connected account
/// POST /api/v1/affiliates/me/payouts
#[utoipa::path(
    post,
    path = "/api/v1/affiliates/me/payouts",
    tag = "Payouts",
    operation_id = "requestPayout",
    request_body = PayoutRequest,
    responses(
        (status = 200, description = "Transfer executed and payout completed", body = PayoutResponse),
        (status = 400, description = "BELOW_MINIMUM_PAYOUT or INSUFFICIENT_BALANCE", body = ApiErrorResponse),
        (status = 404, description = "Caller is not an affiliate", body = ApiErrorResponse),
        (status = 409, description = "PAYOUT_ACCOUNT_NOT_READY", body = ApiErrorResponse),
        (status = 502, description = "Stripe rejected the transfer", body = ApiErrorResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn request_payout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    payload: Result<Json<PayoutRequest>, JsonRejection>,
) -> ApiResult<Json<PayoutResponse>> {
    let Json(request) = payload?;

    let completed = state
        .payout_service
        .request_payout(
            auth_user.user_id,
            request.amount,
            request.payout_method.as_deref(),
        )
        .await?;

    Ok(Json(PayoutResponse {
        success: true,
        payout: completed.payout,
        transfer_id: completed.transfer_id,
    }))
}
