// HTTP handlers and route builders

pub mod affiliates;
pub mod docs;
pub mod payouts;
pub mod usage;
pub mod webhooks;

use crate::{app::AppState, middleware::auth_middleware};
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};

// Usage budget routes, all authenticated
pub fn usage_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/check", post(usage::check_usage))
        .route("/record", post(usage::record_usage))
        .route("/current", get(usage::current_usage))
        .route("/history", get(usage::usage_history))
        .route_layer(from_fn_with_state(state, auth_middleware))
}

// Affiliate routes; only click tracking is public
pub fn affiliate_routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/", post(affiliates::create_affiliate))
        .route("/me", get(affiliates::get_profile))
        .route(
            "/me/payout-settings",
            put(affiliates::update_payout_settings),
        )
        .route(
            "/me/connect",
            post(affiliates::start_connect).get(affiliates::connect_status),
        )
        .route("/me/referrals", get(affiliates::list_referrals))
        .route("/me/sales", get(affiliates::list_sales))
        .route(
            "/me/payouts",
            get(affiliates::list_payouts).post(payouts::request_payout),
        )
        .route_layer(from_fn_with_state(state, auth_middleware));

    Router::new()
        .route("/click", post(affiliates::track_click))
        .merge(protected)
}

// Webhook routes, authenticated by signature
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/stripe", post(webhooks::stripe_webhook))
}
