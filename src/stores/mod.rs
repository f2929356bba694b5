// Persistence seams used by the services.
// PostgreSQL and Redis back them in production, `memory` backs them in tests.

pub mod memory;
pub mod pg_affiliate;
pub mod pg_billing;
pub mod pg_usage;
pub mod redis_markers;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::affiliate::{
    AffiliateProfile, ConnectAccountUpdate, NewAffiliateProfile, NewPayout, NewReferral, NewSale,
    Payout, PayoutSettings, Referral, Sale, SaleRecording,
};
use crate::models::payment::NewPayment;
use crate::models::usage::{UsageDelta, UsagePeriod, UsageRecord};
use crate::models::user::User;

pub use memory::{
    MemoryAffiliateStore, MemoryBillingStore, MemoryClickMarkers, MemoryUsageStore,
};
pub use pg_affiliate::PgAffiliateStore;
pub use pg_billing::PgBillingStore;
pub use pg_usage::PgUsageStore;
pub use redis_markers::RedisClickMarkers;

// =============================================================================
// ERROR TYPES
// =============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Record not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Store unavailable")]
    Unavailable,
}

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};

        match err {
            Error::NotFound => StoreError::NotFound,
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                StoreError::Conflict(
                    info.constraint_name()
                        .unwrap_or_else(|| info.message())
                        .to_string(),
                )
            },
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<bb8::RunError<diesel_async::pooled_connection::PoolError>> for StoreError {
    fn from(err: bb8::RunError<diesel_async::pooled_connection::PoolError>) -> Self {
        StoreError::Pool(err.to_string())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Cache(err.to_string())
    }
}

// =============================================================================
// STORE TRAITS
// =============================================================================

/// Monthly AI usage records
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Load the month's record, creating it with `default_limit_cents` if missing
    async fn get_or_create(
        &self,
        user_id: Uuid,
        period: UsagePeriod,
        default_limit_cents: i32,
    ) -> Result<UsageRecord, StoreError>;

    /// Atomically add a delta to the month's record
    async fn apply_usage(
        &self,
        user_id: Uuid,
        period: UsagePeriod,
        delta: &UsageDelta,
        default_limit_cents: i32,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord, StoreError>;

    async fn history(&self, user_id: Uuid, limit: i64) -> Result<Vec<UsageRecord>, StoreError>;
}

/// Affiliate profiles and their ledger
#[async_trait]
pub trait AffiliateStore: Send + Sync {
    async fn create_profile(
        &self,
        new_profile: NewAffiliateProfile,
    ) -> Result<AffiliateProfile, StoreError>;

    async fn find_profile_by_id(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<AffiliateProfile>, StoreError>;

    async fn find_profile_by_code(&self, code: &str)
        -> Result<Option<AffiliateProfile>, StoreError>;

    async fn find_profile_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<AffiliateProfile>, StoreError>;

    async fn find_profile_by_stripe_account(
        &self,
        account_id: &str,
    ) -> Result<Option<AffiliateProfile>, StoreError>;

    async fn update_payout_settings(
        &self,
        profile_id: Uuid,
        settings: PayoutSettings,
    ) -> Result<AffiliateProfile, StoreError>;

    async fn update_connect_account(
        &self,
        profile_id: Uuid,
        update: ConnectAccountUpdate,
    ) -> Result<AffiliateProfile, StoreError>;

    /// Insert a referral and increment the affiliate's click counter together
    async fn record_click(&self, referral: NewReferral) -> Result<Referral, StoreError>;

    async fn find_referral(&self, referral_id: Uuid) -> Result<Option<Referral>, StoreError>;

    async fn list_referrals(
        &self,
        affiliate_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Referral>, StoreError>;

    /// Insert a pending sale and credit the affiliate, idempotent on the
    /// external payment id
    async fn record_sale(&self, sale: NewSale) -> Result<SaleRecording, StoreError>;

    async fn reject_sale_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Sale>, StoreError>;

    async fn approve_sales_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    async fn list_sales(&self, affiliate_id: Uuid, limit: i64) -> Result<Vec<Sale>, StoreError>;

    /// Move the amount out of the pending balance into a processing payout.
    /// Fails with `InsufficientBalance` when the balance does not cover it.
    async fn reserve_payout(&self, payout: NewPayout) -> Result<Payout, StoreError>;

    async fn complete_payout(
        &self,
        payout_id: Uuid,
        transfer_id: &str,
    ) -> Result<Payout, StoreError>;

    /// Mark the payout failed and return the reserved amount to the balance
    async fn fail_payout(&self, payout_id: Uuid, reason: &str) -> Result<Payout, StoreError>;

    async fn list_payouts(&self, affiliate_id: Uuid, limit: i64)
        -> Result<Vec<Payout>, StoreError>;
}

/// Subscription state of purchasing users
#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn mark_subscribed(
        &self,
        email: &str,
        stripe_customer_id: Option<&str>,
    ) -> Result<Option<User>, StoreError>;

    /// Returns false when the payment was already recorded
    async fn record_payment(&self, payment: NewPayment) -> Result<bool, StoreError>;

    async fn cancel_subscription(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<User>, StoreError>;
}

/// Short-lived "click already recorded" markers
#[async_trait]
pub trait ClickMarkerStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Uuid>, StoreError>;

    async fn put(&self, key: &str, referral_id: Uuid, ttl_seconds: u64)
        -> Result<(), StoreError>;
}
