use async_trait::async_trait;
use uuid::Uuid;

use super::{ClickMarkerStore, StoreError};
use crate::db::RedisPool;

const KEY_PREFIX: &str = "affiliate:click";

/// Click markers kept in Redis with a TTL
#[derive(Clone)]
pub struct RedisClickMarkers {
    redis: RedisPool,
}

impl RedisClickMarkers {
    pub fn new(redis: RedisPool) -> Self {
        Self { redis }
    }

    fn namespaced(key: &str) -> String {
        format!("{}:{}", KEY_PREFIX, key)
    }
}

#[async_trait]
impl ClickMarkerStore for RedisClickMarkers {
    async fn get(&self, key: &str) -> Result<Option<Uuid>, StoreError> {
        Ok(self.redis.get::<Uuid>(&Self::namespaced(key)).await?)
    }

    async fn put(&self, key: &str, referral_id: Uuid, ttl_seconds: u64) -> Result<(), StoreError> {
        // First writer wins, a concurrent duplicate keeps the original referral
        self.redis
            .set_nx_with_expiry(&Self::namespaced(key), referral_id.to_string(), ttl_seconds)
            .await?;
        Ok(())
    }
}
