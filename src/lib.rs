// Library exports for the Chefly backend
// This file exposes modules and functions for library consumers

pub mod app;
pub mod app_config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod migrations;
pub mod models;
pub mod schema;
pub mod services;
pub mod stores;
pub mod utils;

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

// Re-export commonly used types
pub use app::{AppState, AppStores};
pub use app_config::AppConfig;
pub use db::{DieselPool, RedisPool};
pub use middleware::{auth_middleware, AuthenticatedUser};
pub use services::{JwtError, JwtService};
pub use utils::api_errors::{ApiError, ApiResult};

/// Assemble the full HTTP router for a state
pub fn build_router(state: AppState) -> Router {
    let cors = middleware::cors_layer(&state.config);

    let api = Router::new()
        .nest("/usage", handlers::usage_routes(state.clone()))
        .nest("/affiliates", handlers::affiliate_routes(state.clone()))
        .nest("/webhooks", handlers::webhook_routes());

    Router::new()
        .route("/health", get(health_check))
        .route("/openapi.json", get(handlers::docs::serve_openapi_spec))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// Library initialization function for external consumers
pub async fn initialize_app_state(config: &AppConfig) -> anyhow::Result<AppState> {
    // Initialize database pool
    info!("Initializing database pool...");
    let diesel_pool = db::create_diesel_pool(db::DieselDatabaseConfig::from(&config.database)).await?;

    // Run migrations if enabled
    if migrations::should_run_migrations(config) {
        info!("Running embedded migrations...");
        let applied = migrations::run_migrations(&config.database.url).await?;
        info!("Applied {} migrations", applied);
    }

    // Initialize Redis pool
    info!("Initializing Redis pool...");
    let redis_pool = RedisPool::new(&config.redis).await?;

    let processor = Arc::new(services::StripeClient::new(&config.stripe)?);
    let stores = AppStores::postgres(&diesel_pool, &redis_pool);

    Ok(AppState::build(config.clone(), stores, processor).with_pools(diesel_pool, redis_pool))
}

// Health check handler
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let mut overall_healthy = true;
    let timestamp = chrono::Utc::now().to_rfc3339();

    // Check PostgreSQL
    let postgres_health = match &state.diesel_pool {
        Some(pool) => match db::check_diesel_health(pool).await {
            Ok(latency_ms) => serde_json::json!({
                "status": "healthy",
                "latency_ms": latency_ms,
                "max_connections": state.config.database.max_connections,
                "error": null
            }),
            Err(e) => {
                overall_healthy = false;
                serde_json::json!({
                    "status": "unhealthy",
                    "error": format!("Database connection failed: {}", e)
                })
            },
        },
        None => serde_json::json!({ "status": "not_configured" }),
    };

    // Check Redis
    let redis_health = match &state.redis_pool {
        Some(pool) => {
            let result = pool.health_check().await;
            if !result.is_healthy {
                overall_healthy = false;
            }
            serde_json::json!({
                "status": if result.is_healthy { "healthy" } else { "unhealthy" },
                "latency_ms": result.latency_ms,
                "error": result.error
            })
        },
        None => serde_json::json!({ "status": "not_configured" }),
    };

    let response = serde_json::json!({
        "status": if overall_healthy { "healthy" } else { "degraded" },
        "service": "chefly-backend",
        "environment": state.config.server.environment.to_string(),
        "budget_enforcement": state.config.budget.enforcement.to_string(),
        "timestamp": timestamp,
        "components": {
            "postgresql": postgres_health,
            "redis": redis_health
        }
    });

    if overall_healthy {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}
