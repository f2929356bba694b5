// Stripe webhook receiver

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde::Serialize;
use tracing::debug;
use utoipa::ToSchema;

use crate::{
    app::AppState,
    utils::api_errors::{ApiErrorResponse, ApiResult},
};

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}

/// POST /api/v1/webhooks/stripe
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/stripe",
    tag = "Webhooks",
    operation_id = "stripeWebhook",
    request_body(content = String, description = "Raw Stripe event JSON", content_type = "application/json"),
    responses(
        (status = 200, description = "Event accepted", body = WebhookAck),
        (status = 400, description = "Invalid signature or payload; nothing was processed", body = ApiErrorResponse)
    )
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());

    let outcome = state.webhook_service.handle(&body, signature).await?;
    debug!(?outcome, "Stripe webhook processed");

    Ok(Json(WebhookAck { received: true }))
}
