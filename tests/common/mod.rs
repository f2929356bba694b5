// Common test utilities and helper structs
// Shared across all test files to avoid duplication

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, Response, StatusCode},
    Router,
};
use chefly_backend_core::{
    app::{AppState, AppStores},
    app_config::AppConfig,
    build_router,
    services::{FakeProcessor, WebhookVerifier},
    stores::{MemoryAffiliateStore, MemoryBillingStore, MemoryClickMarkers, MemoryUsageStore},
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_chefly";

/// Test application wrapper
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub usage: Arc<MemoryUsageStore>,
    pub affiliates: Arc<MemoryAffiliateStore>,
    pub billing: Arc<MemoryBillingStore>,
    pub click_markers: Arc<MemoryClickMarkers>,
    pub processor: Arc<FakeProcessor>,
}

impl TestApp {
    /// Send a POST request
    pub fn post(&self, uri: &str) -> TestRequest {
        TestRequest::new(self, "POST", uri)
    }

    /// Send a GET request
    pub fn get(&self, uri: &str) -> TestRequest {
        TestRequest::new(self, "GET", uri)
    }

    /// Send a PUT request
    pub fn put(&self, uri: &str) -> TestRequest {
        TestRequest::new(self, "PUT", uri)
    }

    /// Bearer token for a user, signed with the app's JWT secret
    pub fn token_for(&self, user_id: Uuid) -> String {
        self.state
            .jwt_service
            .issue_access_token(user_id, Some("cook@example.com"), 3600)
            .unwrap()
    }

    /// Stripe-Signature header value for a payload, timestamped now
    pub fn sign_webhook(&self, payload: &[u8]) -> String {
        WebhookVerifier::new(TEST_WEBHOOK_SECRET, 300)
            .header_for(chrono::Utc::now().timestamp(), payload)
    }

    /// Register an affiliate through the API and return its code
    pub async fn create_affiliate(&self, user_id: Uuid, code: &str) -> String {
        let profile = self.create_affiliate_profile(user_id, code).await;
        profile["affiliate_code"].as_str().unwrap().to_string()
    }

    pub async fn create_affiliate_profile(&self, user_id: Uuid, code: &str) -> serde_json::Value {
        let response = self
            .post("/api/v1/affiliates")
            .bearer(&self.token_for(user_id))
            .json(&serde_json::json!({ "affiliateCode": code }))
            .send()
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        response.json().await
    }

    /// Run Connect onboarding for the affiliate and mark the account ready
    pub async fn onboard_affiliate(&self, user_id: Uuid) -> String {
        let token = self.token_for(user_id);
        let onboarding: serde_json::Value = self
            .post("/api/v1/affiliates/me/connect")
            .bearer(&token)
            .send()
            .await
            .json()
            .await;
        let account_id = onboarding["account_id"].as_str().unwrap().to_string();

        self.processor.set_account(&account_id, true);
        let status = self
            .get("/api/v1/affiliates/me/connect")
            .bearer(&token)
            .send()
            .await;
        assert_eq!(status.status(), StatusCode::OK);
        account_id
    }
}

/// Test request builder
pub struct TestRequest<'a> {
    app: &'a TestApp,
    method: String,
    uri: String,
    headers: Vec<(String, String)>,
    body: Body,
    custom_ip: Option<String>,
}

impl<'a> TestRequest<'a> {
    fn new(app: &'a TestApp, method: &str, uri: &str) -> Self {
        Self {
            app,
            method: method.to_string(),
            uri: uri.to_string(),
            headers: Vec::new(),
            body: Body::empty(),
            custom_ip: None,
        }
    }

    /// Add JSON body to request
    pub fn json<T: Serialize>(mut self, body: &T) -> Self {
        self.body = Body::from(serde_json::to_vec(body).unwrap());
        self.header("content-type", "application/json")
    }

    /// Raw body, sent exactly as given
    pub fn raw(mut self, body: Vec<u8>) -> Self {
        self.body = Body::from(body);
        self.header("content-type", "application/json")
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        let value = format!("Bearer {}", token);
        self.header("authorization", &value)
    }

    /// Set the peer address seen by the server
    pub fn with_ip(mut self, ip: &str) -> Self {
        self.custom_ip = Some(ip.to_string());
        self
    }

    /// Send the request
    pub async fn send(self) -> TestResponse {
        let mut builder = Request::builder().method(self.method.as_str()).uri(self.uri);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let mut request = builder.body(self.body).unwrap();

        let ip_address = self
            .custom_ip
            .unwrap_or_else(|| "127.0.0.1:12345".to_string());
        request
            .extensions_mut()
            .insert(ConnectInfo(ip_address.parse::<SocketAddr>().unwrap()));

        let response = self.app.app.clone().oneshot(request).await.unwrap();

        TestResponse { response }
    }
}

/// Test response wrapper
pub struct TestResponse {
    response: Response<Body>,
}

impl TestResponse {
    /// Get status code
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// Parse JSON response
    pub async fn json<T: serde::de::DeserializeOwned>(self) -> T {
        let body = axum::body::to_bytes(self.response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }
}

/// Setup test application backed by in-memory stores
pub fn setup_test_app() -> TestApp {
    setup_test_app_with(AppConfig::for_test())
}

pub fn setup_test_app_with(config: AppConfig) -> TestApp {
    let usage = Arc::new(MemoryUsageStore::new());
    let affiliates = Arc::new(MemoryAffiliateStore::new());
    let billing = Arc::new(MemoryBillingStore::new());
    let click_markers = Arc::new(MemoryClickMarkers::new());
    let processor = Arc::new(FakeProcessor::new());

    let stores = AppStores {
        usage: usage.clone(),
        affiliates: affiliates.clone(),
        billing: billing.clone(),
        click_markers: click_markers.clone(),
    };
    let state = AppState::build(config, stores, processor.clone());
    let app = build_router(state.clone());

    TestApp {
        app,
        state,
        usage,
        affiliates,
        billing,
        click_markers,
        processor,
    }
}
