// PostgreSQL pool for the usage, affiliate and billing stores
// Diesel-async connections pooled with bb8

use bb8::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations};
use std::time::Duration;

// Embed migrations at compile time
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/diesel");

pub type DieselPool = Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

/// Pool settings derived from `DatabaseConfig`
#[derive(Debug, Clone)]
pub struct DieselDatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub test_on_checkout: bool,
}

impl From<&crate::app_config::DatabaseConfig> for DieselDatabaseConfig {
    fn from(config: &crate::app_config::DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            min_connections: config.min_connections.min(config.max_connections),
            connection_timeout: Duration::from_secs(config.connect_timeout),
            idle_timeout: Duration::from_secs(config.idle_timeout),
            max_lifetime: Duration::from_secs(config.max_lifetime),
            test_on_checkout: true,
        }
    }
}

/// Create Diesel connection pool
pub async fn create_diesel_pool(config: DieselDatabaseConfig) -> anyhow::Result<DieselPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(config.url.clone());

    let pool = Pool::builder()
        .max_size(config.max_connections)
        .min_idle(Some(config.min_connections))
        .connection_timeout(config.connection_timeout)
        .idle_timeout(Some(config.idle_timeout))
        .max_lifetime(Some(config.max_lifetime))
        .test_on_check_out(config.test_on_checkout)
        .build(manager)
        .await?;

    // Fail fast if the database is unreachable
    let conn = pool.get().await?;
    drop(conn);

    tracing::info!(
        database = %mask_connection_string(&config.url),
        max_connections = config.max_connections,
        "Diesel pool initialized"
    );

    Ok(pool)
}

/// Health check for database pool, returns checkout latency in milliseconds
pub async fn check_diesel_health(pool: &DieselPool) -> anyhow::Result<u64> {
    let start = std::time::Instant::now();
    let conn = pool.get().await?;
    drop(conn);

    Ok(start.elapsed().as_millis() as u64)
}

/// Mask database connection string for logging
pub fn mask_connection_string(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let scheme = match parsed.scheme() {
                "postgres" => "postgresql",
                other => other,
            };
            let host = parsed.host_str().unwrap_or("***");

            if parsed.username().is_empty() && parsed.password().is_none() {
                format!("{}://{}{}", scheme, host, parsed.path())
            } else {
                format!("{}://***:***@{}{}", scheme, host, parsed.path())
            }
        }
        Err(_) => "postgresql://***:***@***".to_string(),
    }
}
