// AI usage budget endpoints

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Extension, Query, State},
    Json,
};
use tracing::debug;
use uuid::Uuid;
use validator::Validate;

use crate::{
    app::AppState,
    middleware::auth::AuthenticatedUser,
    models::usage::{
        BudgetCheckResponse, CheckUsageRequest, OperationType, RecordUsageRequest,
        RecordUsageResponse, UsageHistoryQuery, UsageRecord,
    },
    utils::api_errors::{ApiError, ApiErrorResponse, ApiResult},
};

/// Body user ids must belong to the caller
fn resolve_user(auth_user: &AuthenticatedUser, user_id: &str) -> ApiResult<Uuid> {
    let user_id = Uuid::parse_str(user_id.trim())
        .map_err(|_| ApiError::ValidationError("userId must be a valid UUID".to_string()))?;

    if user_id != auth_user.user_id {
        return Err(ApiError::Forbidden(
            "userId does not match the authenticated user".to_string(),
        ));
    }
    Ok(user_id)
}

fn parse_operation(operation_type: &str) -> ApiResult<OperationType> {
    operation_type
        .trim()
        .parse::<OperationType>()
        .map_err(ApiError::ValidationError)
}

/// Check whether an AI operation fits in this month's budget
/// POST /api/v1/usage/check
#[utoipa::path(
    post,
    path = "/api/v1/usage/check",
    tag = "Usage",
    operation_id = "checkUsage",
    request_body = CheckUsageRequest,
    responses(
        (status = 200, description = "Budget decision, denied requests carry allowed=false", body = BudgetCheckResponse),
        (status = 400, description = "Invalid userId or operationType", body = ApiErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ApiErrorResponse),
        (status = 403, description = "userId belongs to another user", body = ApiErrorResponse),
        (status = 503, description = "Usage store unavailable in strict mode", body = ApiErrorResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn check_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    payload: Result<Json<CheckUsageRequest>, JsonRejection>,
) -> ApiResult<Json<BudgetCheckResponse>> {
    let Json(request) = payload?;
    request.validate()?;

    let user_id = resolve_user(&auth_user, &request.user_id)?;
    let operation = parse_operation(&request.operation_type)?;

    let decision = state.usage_service.check_budget(user_id, operation).await?;
    Ok(Json(decision.into()))
}

/// Record the actual cost of a completed AI operation
/// POST /api/v1/usage/record
#[utoipa::path(
    post,
    path = "/api/v1/usage/record",
    tag = "Usage",
    operation_id = "recordUsage",
    request_body = RecordUsageRequest,
    responses(
        (status = 200, description = "Usage recorded", body = RecordUsageResponse),
        (status = 400, description = "Invalid input such as a negative costCents", body = ApiErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ApiErrorResponse),
        (status = 403, description = "userId belongs to another user", body = ApiErrorResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn record_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    payload: Result<Json<RecordUsageRequest>, JsonRejection>,
) -> ApiResult<Json<RecordUsageResponse>> {
    let Json(request) = payload?;
    request.validate()?;

    let user_id = resolve_user(&auth_user, &request.user_id)?;
    let operation = parse_operation(&request.operation_type)?;

    let record = state
        .usage_service
        .record_usage(user_id, operation, request.cost_cents, request.was_cached)
        .await?;

    debug!(
        user_id = %user_id,
        operation = operation.as_str(),
        total_cost_cents = record.total_cost_cents,
        "Usage recorded"
    );

    Ok(Json(RecordUsageResponse {
        success: true,
        total_cost_cents: record.total_cost_cents,
        is_limit_reached: record.is_limit_reached,
    }))
}

/// Current month's usage record for the caller
/// GET /api/v1/usage/current
#[utoipa::path(
    get,
    path = "/api/v1/usage/current",
    tag = "Usage",
    operation_id = "currentUsage",
    responses(
        (status = 200, description = "Usage for the current month", body = UsageRecord),
        (status = 401, description = "Missing or invalid token", body = ApiErrorResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn current_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<UsageRecord>> {
    let record = state.usage_service.current_usage(auth_user.user_id).await?;
    Ok(Json(record))
}

/// Past monthly usage records, newest first
/// GET /api/v1/usage/history
#[utoipa::path(
    get,
    path = "/api/v1/usage/history",
    tag = "Usage",
    operation_id = "usageHistory",
    params(("limit" = Option<i64>, Query, description = "Number of months, 1-60, default 12")),
    responses(
        (status = 200, description = "Monthly usage records", body = [UsageRecord]),
        (status = 400, description = "Invalid limit", body = ApiErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ApiErrorResponse)
    ),
    security(("bearerAuth" = []))
)]
pub async fn usage_history(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthenticatedUser>,
    query: Result<Query<UsageHistoryQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<UsageRecord>>> {
    let Query(query) = query?;
    query.validate()?;

    let records = state
        .usage_service
        .usage_history(auth_user.user_id, query.limit.unwrap_or(12))
        .await?;
    Ok(Json(records))
}
