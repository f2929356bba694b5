// Affiliate program endpoints: click tracking, profile and Connect onboarding

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Extension, Query, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::{
    app::AppState,
    middleware::auth::AuthenticatedUser,
    models::affiliate::{
        AffiliateProfileResponse, ConnectOnboardingResponse, ConnectStatusResponse,
        CreateAffiliateRequest, ListQuery, Payout, Referral, Sale, TrackClickRequest,
        TrackClickResponse, UpdatePayoutSettingsRequest,
    },
    services::affiliate::ClickContext,
    utils::{
        api_errors::{ApiErrorResponse, ApiResult},
        client_ip::ClientMeta,
    },
};

// =============================================================================
// PUBLIC
// =============================================================================

/// Record a referral click for an affiliate code
/// POST /api/v1/affiliates/click
#[utoipa::path(
    post,
    path = "/api/v1/affiliates/click",
    tag = "Affiliates",
    operation_id = "trackAffiliateClick",
    request_body = TrackClickRequest,
    responses(
        (status = 200, description = "Click recorded or already recorded in the last 24h", body = TrackClickResponse),
        (status = 400, description = "Missing affiliateCode", body = ApiErrorResponse),
        (status = 404, description = "Unknown or inactive affiliate code", body = ApiErrorResponse)
    )
)]
pub async fn track_click(
    State(state): State<AppState>,
    client: ClientMeta,
    payload: Result<Json<TrackClickRequest>, JsonRejection>,
) -> ApiResult<Json<TrackClickResponse>> {
    let Json(request) = payload?;
    request.validate()?;

    let outcome = state
        .affiliate_service
        .track_click(ClickContext {
            affiliate_code: request.affiliate_code,
            referrer_url: request.referrer_url.or(client.referer),
            landing_page: request.landing_page,
            ip_address: client.ip,
            user_agent: client.user_agent,
        })
        .await?;

    Ok(Json(TrackClickResponse {
        success: true,
        referral_id: outcome.referral_id,
        affiliate_code: outcome.affiliate_code,
        duplicate: outcome.duplicate,
    }))
}

// =============================================================================
// AUTHENTICATED AFFILIATE
// =============================================================================

/// Register the caller as an affiliate
/// POST /api/v1/affiliates
#[utoipa::path(
    post,
    path = "/api/v1/affiliates",
    tag = "Affiliates",
    operation_id = "createAffiliate",
    request_body = CreateAffiliateRequest,
    responses(
        (status = 201, description = "Affiliate profile created", body = AffiliateProfileResponse),
        (status = 400, description = "Invalid custom code", body = ApiErrorResponse),
        (status = 409, description = "Already an affiliate or code taken", body = ApiErrorResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_affiliate(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    payload: Result<Json<CreateAffiliateRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AffiliateProfileResponse>)> {
    let Json(request) = payload?;

    let profile = state
        .affiliate_service
        .create_profile(auth_user.user_id, request.affiliate_code)
        .await?;

    Ok((StatusCode::CREATED, Json(profile.into())))
}

/// Profile and balances of the caller
/// GET /api/v1/affiliates/me
#[utoipa::path(
    get,
    path = "/api/v1/affiliates/me",
    tag = "Affiliates",
    operation_id = "getAffiliateProfile",
    responses(
        (status = 200, description = "Affiliate profile", body = AffiliateProfileResponse),
        (status = 404, description = "Caller is not an affiliate", body = ApiErrorResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<AffiliateProfileResponse>> {
    let profile = state
        .affiliate_service
        .profile_for_user(auth_user.user_id)
        .await?;
    Ok(Json(profile.into()))
}

/// PUT /api/v1/affiliates/me/payout-settings
#[utoipa::path(
    put,
    path = "/api/v1/affiliates/me/payout-settings",
    tag = "Affiliates",
    operation_id = "updatePayoutSettings",
    request_body = UpdatePayoutSettingsRequest,
    responses(
        (status = 200, description = "Payout settings saved", body = AffiliateProfileResponse),
        (status = 400, description = "Invalid method, email or IBAN", body = ApiErrorResponse),
        (status = 404, description = "Caller is not an affiliate", body = ApiErrorResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_payout_settings(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    payload: Result<Json<UpdatePayoutSettingsRequest>, JsonRejection>,
) -> ApiResult<Json<AffiliateProfileResponse>> {
    let Json(request) = payload?;
    request.validate()?;

    let profile = state
        .affiliate_service
        .update_payout_settings(auth_user.user_id, request)
        .await?;
    Ok(Json(profile.into()))
}

/// Start or resume Stripe Connect onboarding
/// POST /api/v1/affiliates/me/connect
#[utoipa::path(
    post,
    path = "/api/v1/affiliates/me/connect",
    tag = "Affiliates",
    operation_id = "startConnectOnboarding",
    responses(
        (status = 200, description = "Hosted onboarding link", body = ConnectOnboardingResponse),
        (status = 404, description = "Caller is not an affiliate", body = ApiErrorResponse),
        (status = 502, description = "Stripe rejected the request", body = ApiErrorResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn start_connect(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<ConnectOnboardingResponse>> {
    let onboarding = state
        .affiliate_service
        .start_connect_onboarding(auth_user.user_id, auth_user.email.as_deref())
        .await?;
    Ok(Json(onboarding))
}

/// Refresh the connected account status from Stripe
/// GET /api/v1/affiliates/me/connect
#[utoipa::path(
    get,
    path = "/api/v1/affiliates/me/connect",
    tag = "Affiliates",
    operation_id = "connectStatus",
    responses(
        (status = 200, description = "Connected account status", body = ConnectStatusResponse),
        (status = 404, description = "Caller is not an affiliate", body = ApiErrorResponse),
        (status = 502, description = "Stripe rejected the request", body = ApiErrorResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn connect_status(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<ConnectStatusResponse>> {
    let status = state
        .affiliate_service
        .refresh_connect_status(auth_user.user_id)
        .await?;
    Ok(Json(status))
}

// =============================================================================
// HISTORY
// =============================================================================

/// GET /api/v1/affiliates/me/referrals
#[utoipa::path(
    get,
    path = "/api/v1/affiliates/me/referrals",
    tag = "Affiliates",
    operation_id = "listReferrals",
    params(("limit" = Option<i64>, Query, description = "1-200, default 50")),
    responses((status = 200, description = "Recorded clicks, newest first", body = [Referral])),
    security(("bearerAuth" = []))
)]
pub async fn list_referrals(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Referral>>> {
    let Query(query) = query?;
    query.validate()?;

    let referrals = state
        .affiliate_service
        .list_referrals(auth_user.user_id, query.limit_or_default())
        .await?;
    Ok(Json(referrals))
}

/// GET /api/v1/affiliates/me/sales
#[utoipa::path(
    get,
    path = "/api/v1/affiliates/me/sales",
    tag = "Affiliates",
    operation_id = "listSales",
    params(("limit" = Option<i64>, Query, description = "1-200, default 50")),
    responses((status = 200, description = "Commissioned sales, newest first", body = [Sale])),
    security(("bearerAuth" = []))
)]
pub async fn list_sales(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Sale>>> {
    let Query(query) = query?;
    query.validate()?;

    let sales = state
        .affiliate_service
        .list_sales(auth_user.user_id, query.limit_or_default())
        .await?;
    Ok(Json(sales))
}

/// GET /api/v1/affiliates/me/payouts
#[utoipa::path(
    get,
    path = "/api/v1/affiliates/me/payouts",
    tag = "Payouts",
    operation_id = "listPayouts",
    params(("limit" = Option<i64>, Query, description = "1-200, default 50")),
    responses((status = 200, description = "Payout requests, newest first", body = [Payout])),
    security(("bearerAuth" = []))
)]
pub async fn list_payouts(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Payout>>> {
    let Query(query) = query?;
    query.validate()?;

    let payouts = state
        .affiliate_service
        .list_payouts(auth_user.user_id, query.limit_or_default())
        .await?;
    Ok(Json(payouts))
}
