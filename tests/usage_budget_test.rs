// AI usage budget API tests against in-memory stores

mod common;

use axum::http::StatusCode;
use chefly_backend_core::app_config::{AppConfig, BudgetEnforcement};
use common::{setup_test_app, setup_test_app_with};
use serde_json::{json, Value};
use uuid::Uuid;

#[tokio::test]
async fn test_check_requires_authentication() {
    let app = setup_test_app();

    let response = app
        .post("/api/v1/usage/check")
        .json(&json!({ "userId": Uuid::new_v4(), "operationType": "chat" }))
        .send()
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_fresh_user_gets_full_budget() {
    let app = setup_test_app();
    let user_id = Uuid::new_v4();

    let response = app
        .post("/api/v1/usage/check")
        .bearer(&app.token_for(user_id))
        .json(&json!({ "userId": user_id, "operationType": "scan" }))
        .send()
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await;
    assert_eq!(body["allowed"], true);
    assert_eq!(body["remaining_cents"], 200);
    assert_eq!(body["total_used_cents"], 0);
    assert_eq!(body["limit_cents"], 200);
}

#[tokio::test]
async fn test_recorded_usage_exhausts_budget() {
    let app = setup_test_app();
    let user_id = Uuid::new_v4();
    let token = app.token_for(user_id);

    // 24 scans at 8 cents leave 8 cents, enough for one more scan
    for _ in 0..24 {
        let response = app
            .post("/api/v1/usage/record")
            .bearer(&token)
            .json(&json!({ "userId": user_id, "operationType": "scan", "costCents": 8 }))
            .send()
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let check: Value = app
        .post("/api/v1/usage/check")
        .bearer(&token)
        .json(&json!({ "userId": user_id, "operationType": "scan" }))
        .send()
        .await
        .json()
        .await;
    assert_eq!(check["allowed"], true);
    assert_eq!(check["remaining_cents"], 8);

    let last: Value = app
        .post("/api/v1/usage/record")
        .bearer(&token)
        .json(&json!({ "userId": user_id, "operationType": "scan", "costCents": 8 }))
        .send()
        .await
        .json()
        .await;
    assert_eq!(last["total_cost_cents"], 200);
    assert_eq!(last["is_limit_reached"], true);

    let denied = app
        .post("/api/v1/usage/check")
        .bearer(&token)
        .json(&json!({ "userId": user_id, "operationType": "chat" }))
        .send()
        .await;
    assert_eq!(denied.status(), StatusCode::OK);
    let denied: Value = denied.json().await;
    assert_eq!(denied["allowed"], false);
    assert_eq!(denied["remaining_cents"], 0);
    assert!(denied["message"].as_str().unwrap().contains("monthly"));
}

#[tokio::test]
async fn test_operation_that_would_overshoot_is_denied() {
    let app = setup_test_app();
    let user_id = Uuid::new_v4();
    let token = app.token_for(user_id);

    app.post("/api/v1/usage/record")
        .bearer(&token)
        .json(&json!({ "userId": user_id, "operationType": "chat", "costCents": 195 }))
        .send()
        .await;

    let scan: Value = app
        .post("/api/v1/usage/check")
        .bearer(&token)
        .json(&json!({ "userId": user_id, "operationType": "scan" }))
        .send()
        .await
        .json()
        .await;
    assert_eq!(scan["allowed"], false);

    let chat: Value = app
        .post("/api/v1/usage/check")
        .bearer(&token)
        .json(&json!({ "userId": user_id, "operationType": "chat" }))
        .send()
        .await
        .json()
        .await;
    assert_eq!(chat["allowed"], true);
}

#[tokio::test]
async fn test_other_users_budget_is_forbidden() {
    let app = setup_test_app();
    let caller = Uuid::new_v4();

    let response = app
        .post("/api/v1/usage/check")
        .bearer(&app.token_for(caller))
        .json(&json!({ "userId": Uuid::new_v4(), "operationType": "chat" }))
        .send()
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_invalid_inputs_are_rejected() {
    let app = setup_test_app();
    let user_id = Uuid::new_v4();
    let token = app.token_for(user_id);

    let unknown_op = app
        .post("/api/v1/usage/check")
        .bearer(&token)
        .json(&json!({ "userId": user_id, "operationType": "video" }))
        .send()
        .await;
    assert_eq!(unknown_op.status(), StatusCode::BAD_REQUEST);
    let body: Value = unknown_op.json().await;
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let negative = app
        .post("/api/v1/usage/record")
        .bearer(&token)
        .json(&json!({ "userId": user_id, "operationType": "chat", "costCents": -5 }))
        .send()
        .await;
    assert_eq!(negative.status(), StatusCode::BAD_REQUEST);

    let bad_user = app
        .post("/api/v1/usage/check")
        .bearer(&token)
        .json(&json!({ "userId": "not-a-uuid", "operationType": "chat" }))
        .send()
        .await;
    assert_eq!(bad_user.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_store_outage_fails_open_in_advisory_mode() {
    let app = setup_test_app();
    let user_id = Uuid::new_v4();
    app.usage.set_unavailable(true);

    let response = app
        .post("/api/v1/usage/check")
        .bearer(&app.token_for(user_id))
        .json(&json!({ "userId": user_id, "operationType": "scan" }))
        .send()
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await;
    assert_eq!(body["allowed"], true);
    assert_eq!(body["remaining_cents"], 200);
}

#[tokio::test]
async fn test_store_outage_denies_in_strict_mode() {
    let mut config = AppConfig::for_test();
    config.budget.enforcement = BudgetEnforcement::Strict;
    let app = setup_test_app_with(config);
    let user_id = Uuid::new_v4();
    app.usage.set_unavailable(true);

    let response = app
        .post("/api/v1/usage/check")
        .bearer(&app.token_for(user_id))
        .json(&json!({ "userId": user_id, "operationType": "scan" }))
        .send()
        .await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_current_and_history_reflect_recordings() {
    let app = setup_test_app();
    let user_id = Uuid::new_v4();
    let token = app.token_for(user_id);

    for (operation, cost, cached) in [("chat", 2, false), ("scan", 8, true), ("shopping", 3, false)] {
        app.post("/api/v1/usage/record")
            .bearer(&token)
            .json(&json!({
                "userId": user_id,
                "operationType": operation,
                "costCents": cost,
                "wasCached": cached
            }))
            .send()
            .await;
    }

    let current: Value = app
        .get("/api/v1/usage/current")
        .bearer(&token)
        .send()
        .await
        .json()
        .await;
    assert_eq!(current["chat_message_count"], 1);
    assert_eq!(current["cached_scan_count"], 1);
    assert_eq!(current["food_scan_count"], 0);
    assert_eq!(current["shopping_list_count"], 1);
    assert_eq!(current["total_cost_cents"], 13);

    let history: Vec<Value> = app
        .get("/api/v1/usage/history?limit=5")
        .bearer(&token)
        .send()
        .await
        .json()
        .await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["total_cost_cents"], 13);
}
