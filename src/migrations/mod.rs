// Embedded PostgreSQL migrations
// Shipped inside the binary so the container needs no migration tooling

use diesel::{Connection, PgConnection};
use diesel_migrations::MigrationHarness;
use thiserror::Error;
use tracing::{debug, info};

use crate::app_config::AppConfig;
use crate::db::diesel_pool::MIGRATIONS;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Failed to establish sync connection: {0}")]
    Connection(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Migration task panicked: {0}")]
    Task(String),
}

/// Migrations run at startup unless explicitly disabled
pub fn should_run_migrations(config: &AppConfig) -> bool {
    !config.disable_embedded_migrations
}

/// Apply pending migrations, returning how many ran.
/// diesel_migrations needs a sync connection, so this runs on the blocking pool.
pub async fn run_migrations(database_url: &str) -> Result<usize, MigrationError> {
    let database_url = database_url.to_string();

    tokio::task::spawn_blocking(move || -> Result<usize, MigrationError> {
        let mut conn = PgConnection::establish(&database_url)
            .map_err(|e| MigrationError::Connection(e.to_string()))?;

        let pending = conn
            .pending_migrations(MIGRATIONS)
            .map_err(|e| MigrationError::Migration(e.to_string()))?;
        if pending.is_empty() {
            debug!("[MIGRATIONS] No pending migrations");
            return Ok(0);
        }
        info!("[MIGRATIONS] Found {} pending migrations", pending.len());

        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| MigrationError::Migration(e.to_string()))?;
        for migration in &applied {
            debug!("[MIGRATIONS] Applied migration: {}", migration);
        }

        Ok(applied.len())
    })
    .await
    .map_err(|e| MigrationError::Task(e.to_string()))?
}

#[derive(Debug)]
pub struct MigrationStatus {
    pub applied: Vec<String>,
    pub pending: Vec<String>,
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

pub async fn check_migration_status(database_url: &str) -> Result<MigrationStatus, MigrationError> {
    let database_url = database_url.to_string();

    tokio::task::spawn_blocking(move || -> Result<MigrationStatus, MigrationError> {
        let mut conn = PgConnection::establish(&database_url)
            .map_err(|e| MigrationError::Connection(e.to_string()))?;

        let applied = conn
            .applied_migrations()
            .map_err(|e| MigrationError::Migration(e.to_string()))?;
        let pending = conn
            .pending_migrations(MIGRATIONS)
            .map_err(|e| MigrationError::Migration(e.to_string()))?;

        Ok(MigrationStatus {
            applied: applied.iter().map(|m| m.to_string()).collect(),
            pending: pending.iter().map(|m| m.name().to_string()).collect(),
        })
    })
    .await
    .map_err(|e| MigrationError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_migrations_present() {
        use diesel::migration::MigrationSource;
        use diesel::pg::Pg;

        let migrations = MigrationSource::<Pg>::migrations(&MIGRATIONS).unwrap();
        let names: Vec<String> = migrations.iter().map(|m| m.name().to_string()).collect();
        assert_eq!(names.len(), 3);
        assert!(names.iter().any(|n| n.contains("create_users_and_payments")));
        assert!(names.iter().any(|n| n.contains("create_affiliates")));
    }

    #[test]
    fn test_should_run_migrations_respects_flag() {
        let mut config = AppConfig::for_test();
        assert!(should_run_migrations(&config));
        config.disable_embedded_migrations = true;
        assert!(!should_run_migrations(&config));
    }
}
