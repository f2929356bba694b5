use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{StoreError, UsageStore};
use crate::db::DieselPool;
use crate::models::usage::{UsageDelta, UsagePeriod, UsageRecord};

/// `ai_usage` backed by PostgreSQL
#[derive(Clone)]
pub struct PgUsageStore {
    pool: DieselPool,
}

impl PgUsageStore {
    pub fn new(pool: DieselPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn get_or_create(
        &self,
        user_id: Uuid,
        period: UsagePeriod,
        default_limit_cents: i32,
    ) -> Result<UsageRecord, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(UsageRecord::get_or_create(&mut conn, user_id, period, default_limit_cents).await?)
    }

    async fn apply_usage(
        &self,
        user_id: Uuid,
        period: UsagePeriod,
        delta: &UsageDelta,
        default_limit_cents: i32,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(
            UsageRecord::apply_delta(&mut conn, user_id, period, delta, default_limit_cents, now)
                .await?,
        )
    }

    async fn history(&self, user_id: Uuid, limit: i64) -> Result<Vec<UsageRecord>, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(UsageRecord::history(&mut conn, user_id, limit).await?)
    }
}
