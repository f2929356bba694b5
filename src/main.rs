use std::net::SocketAddr;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chefly_backend_core::{
    build_router, initialize_app_state, services::initialize_background_tasks, AppConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before reading configuration
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chefly_backend_core=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        anyhow::anyhow!(e)
    })?;

    info!(
        environment = %config.server.environment,
        budget_enforcement = %config.budget.enforcement,
        "Starting Chefly backend"
    );

    let state = initialize_app_state(&config).await.map_err(|e| {
        error!("Failed to initialize application state: {}", e);
        e
    })?;

    let approvals = initialize_background_tasks(&state);

    let app = build_router(state);

    let bind_address = config.server.bind_address.clone();
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Listening on {}", bind_address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    approvals.abort();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
