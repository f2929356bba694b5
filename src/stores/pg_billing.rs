use async_trait::async_trait;
use chrono::Utc;

use super::{BillingStore, StoreError};
use crate::db::DieselPool;
use crate::models::payment::{NewPayment, Payment};
use crate::models::user::User;

/// Users and payments backed by PostgreSQL
#[derive(Clone)]
pub struct PgBillingStore {
    pool: DieselPool,
}

impl PgBillingStore {
    pub fn new(pool: DieselPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn mark_subscribed(
        &self,
        email: &str,
        stripe_customer_id: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(User::mark_subscribed(&mut conn, email, stripe_customer_id, Utc::now()).await?)
    }

    async fn record_payment(&self, payment: NewPayment) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(Payment::insert_if_absent(&mut conn, &payment).await?.is_some())
    }

    async fn cancel_subscription(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(User::cancel_subscription(&mut conn, stripe_customer_id, Utc::now()).await?)
    }
}
