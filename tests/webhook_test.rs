// Stripe webhook intake tests: signature gate, subscription state and commissions

mod common;

use axum::http::StatusCode;
use common::{setup_test_app, TestApp};
use serde_json::{json, Value};
use uuid::Uuid;

fn checkout_event(session_id: &str, email: &str, amount: i64, metadata: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": format!("evt_{}", session_id),
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": session_id,
                "customer": "cus_123",
                "customer_details": { "email": email },
                "amount_total": amount,
                "currency": "EUR",
                "payment_intent": format!("pi_{}", session_id),
                "subscription": "sub_123",
                "metadata": metadata
            }
        }
    }))
    .unwrap()
}

async fn deliver(app: &TestApp, payload: Vec<u8>) -> StatusCode {
    let signature = app.sign_webhook(&payload);
    app.post("/api/v1/webhooks/stripe")
        .header("stripe-signature", &signature)
        .raw(payload)
        .send()
        .await
        .status()
}

async fn sales_for(app: &TestApp, user_id: Uuid) -> Vec<Value> {
    app.get("/api/v1/affiliates/me/sales")
        .bearer(&app.token_for(user_id))
        .send()
        .await
        .json()
        .await
}

#[tokio::test]
async fn test_checkout_subscribes_user_and_credits_affiliate() {
    let app = setup_test_app();
    let buyer = Uuid::new_v4();
    app.billing.insert_user(buyer, "Buyer@Example.com").await;
    let affiliate_user = Uuid::new_v4();
    app.create_affiliate(affiliate_user, "CHEF").await;

    let status = deliver(
        &app,
        checkout_event("cs_1", "buyer@example.com", 999, json!({ "affiliate_code": "chef" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let user = app.billing.user(buyer).await.unwrap();
    assert!(user.is_subscribed);
    assert_eq!(user.stripe_customer_id.as_deref(), Some("cus_123"));
    assert_eq!(app.billing.payments().await.len(), 1);

    let sales = sales_for(&app, affiliate_user).await;
    assert_eq!(sales.len(), 1);
    assert_eq!(sales[0]["commission_cents"], 199);
    assert_eq!(sales[0]["commission_rate_bps"], 2000);
    assert_eq!(sales[0]["currency"], "eur");
    assert_eq!(sales[0]["status"], "pending");

    let profile: Value = app
        .get("/api/v1/affiliates/me")
        .bearer(&app.token_for(affiliate_user))
        .send()
        .await
        .json()
        .await;
    assert_eq!(profile["pending_balance_cents"], 199);
    assert_eq!(profile["total_conversions"], 1);
}

#[tokio::test]
async fn test_redelivered_checkout_credits_once() {
    let app = setup_test_app();
    let affiliate_user = Uuid::new_v4();
    app.create_affiliate(affiliate_user, "TWICE").await;
    let payload = checkout_event("cs_2", "someone@example.com", 1999, json!({ "affiliate_code": "TWICE" }));

    assert_eq!(deliver(&app, payload.clone()).await, StatusCode::OK);
    assert_eq!(deliver(&app, payload).await, StatusCode::OK);

    let sales = sales_for(&app, affiliate_user).await;
    assert_eq!(sales.len(), 1);
    assert_eq!(sales[0]["commission_cents"], 399);
}

#[tokio::test]
async fn test_invalid_signature_changes_nothing() {
    let app = setup_test_app();
    let buyer = Uuid::new_v4();
    app.billing.insert_user(buyer, "buyer@example.com").await;
    app.create_affiliate(Uuid::new_v4(), "FORGED").await;
    let payload = checkout_event("cs_3", "buyer@example.com", 999, json!({ "affiliate_code": "FORGED" }));

    let forged = app
        .post("/api/v1/webhooks/stripe")
        .header("stripe-signature", "t=1700000000,v1=deadbeef")
        .raw(payload.clone())
        .send()
        .await;
    assert_eq!(forged.status(), StatusCode::BAD_REQUEST);
    let body: Value = forged.json().await;
    assert_eq!(body["code"], "INVALID_SIGNATURE");

    let unsigned = app
        .post("/api/v1/webhooks/stripe")
        .raw(payload)
        .send()
        .await;
    assert_eq!(unsigned.status(), StatusCode::BAD_REQUEST);

    assert!(!app.billing.user(buyer).await.unwrap().is_subscribed);
    assert!(app.billing.payments().await.is_empty());
    assert_eq!(app.affiliates.sale_count().await, 0);
}

#[tokio::test]
async fn test_unattributed_checkout_records_no_sale() {
    let app = setup_test_app();
    let buyer = Uuid::new_v4();
    app.billing.insert_user(buyer, "plain@example.com").await;

    let status = deliver(&app, checkout_event("cs_4", "plain@example.com", 999, json!({}))).await;

    assert_eq!(status, StatusCode::OK);
    assert!(app.billing.user(buyer).await.unwrap().is_subscribed);
    assert_eq!(app.affiliates.sale_count().await, 0);
}

#[tokio::test]
async fn test_checkout_attributed_by_referral_click() {
    let app = setup_test_app();
    let affiliate_user = Uuid::new_v4();
    app.create_affiliate(affiliate_user, "CLICKED").await;

    let click: Value = app
        .post("/api/v1/affiliates/click")
        .json(&json!({ "affiliateCode": "CLICKED" }))
        .send()
        .await
        .json()
        .await;
    let referral_id = click["referralId"].as_str().unwrap();

    let status = deliver(
        &app,
        checkout_event("cs_5", "new@example.com", 999, json!({ "referral_id": referral_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let sales = sales_for(&app, affiliate_user).await;
    assert_eq!(sales.len(), 1);
    assert_eq!(sales[0]["referral_id"], referral_id);
}

#[tokio::test]
async fn test_coded_checkout_ignores_buyer_reference_id() {
    let app = setup_test_app();
    let buyer = Uuid::new_v4();
    app.billing.insert_user(buyer, "ref@example.com").await;
    let affiliate_user = Uuid::new_v4();
    app.create_affiliate(affiliate_user, "CODED").await;

    let mut event: Value = serde_json::from_slice(&checkout_event(
        "cs_8",
        "ref@example.com",
        999,
        json!({ "affiliate_code": "CODED" }),
    ))
    .unwrap();
    event["data"]["object"]["client_reference_id"] = json!(buyer.to_string());

    let status = deliver(&app, serde_json::to_vec(&event).unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    let sales = sales_for(&app, affiliate_user).await;
    assert_eq!(sales.len(), 1);
    assert_eq!(sales[0]["commission_cents"], 199);
    assert!(sales[0]["referral_id"].is_null());
}

#[tokio::test]
async fn test_refund_reverses_commission() {
    let app = setup_test_app();
    let affiliate_user = Uuid::new_v4();
    app.create_affiliate(affiliate_user, "REFUND").await;
    deliver(
        &app,
        checkout_event("cs_6", "refund@example.com", 999, json!({ "affiliate_code": "REFUND" })),
    )
    .await;

    let refund = serde_json::to_vec(&json!({
        "id": "evt_refund",
        "type": "charge.refunded",
        "data": { "object": { "id": "ch_1", "payment_intent": "pi_cs_6" } }
    }))
    .unwrap();
    assert_eq!(deliver(&app, refund).await, StatusCode::OK);

    let sales = sales_for(&app, affiliate_user).await;
    assert_eq!(sales[0]["status"], "rejected");

    let profile: Value = app
        .get("/api/v1/affiliates/me")
        .bearer(&app.token_for(affiliate_user))
        .send()
        .await
        .json()
        .await;
    assert_eq!(profile["pending_balance_cents"], 0);
}

#[tokio::test]
async fn test_subscription_deleted_unsubscribes_user() {
    let app = setup_test_app();
    let buyer = Uuid::new_v4();
    app.billing.insert_user(buyer, "leaving@example.com").await;
    deliver(&app, checkout_event("cs_7", "leaving@example.com", 999, json!({}))).await;

    let cancelled = serde_json::to_vec(&json!({
        "id": "evt_cancel",
        "type": "customer.subscription.deleted",
        "data": { "object": { "id": "sub_123", "customer": "cus_123" } }
    }))
    .unwrap();
    assert_eq!(deliver(&app, cancelled).await, StatusCode::OK);

    let user = app.billing.user(buyer).await.unwrap();
    assert!(!user.is_subscribed);
    assert_eq!(user.subscription_tier, "free");
}

#[tokio::test]
async fn test_unknown_event_is_acknowledged() {
    let app = setup_test_app();
    let payload = serde_json::to_vec(&json!({
        "id": "evt_other",
        "type": "invoice.created",
        "data": { "object": { "id": "in_1" } }
    }))
    .unwrap();

    let signature = app.sign_webhook(&payload);
    let response = app
        .post("/api/v1/webhooks/stripe")
        .header("stripe-signature", &signature)
        .raw(payload)
        .send()
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await;
    assert_eq!(body["received"], true);
}
