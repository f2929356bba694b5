use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{AffiliateStore, StoreError};
use crate::db::DieselPool;
use crate::models::affiliate::{
    AffiliateProfile, ConnectAccountUpdate, NewAffiliateProfile, NewPayout, NewReferral, NewSale,
    Payout, PayoutSettings, Referral, Sale, SaleRecording,
};

/// Affiliate tables backed by PostgreSQL
#[derive(Clone)]
pub struct PgAffiliateStore {
    pool: DieselPool,
}

impl PgAffiliateStore {
    pub fn new(pool: DieselPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AffiliateStore for PgAffiliateStore {
    async fn create_profile(
        &self,
        new_profile: NewAffiliateProfile,
    ) -> Result<AffiliateProfile, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(AffiliateProfile::insert(&mut conn, &new_profile).await?)
    }

    async fn find_profile_by_id(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<AffiliateProfile>, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(AffiliateProfile::find_by_id(&mut conn, profile_id).await?)
    }

    async fn find_profile_by_code(
        &self,
        code: &str,
    ) -> Result<Option<AffiliateProfile>, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(AffiliateProfile::find_by_code(&mut conn, code).await?)
    }

    async fn find_profile_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<AffiliateProfile>, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(AffiliateProfile::find_by_user_id(&mut conn, user_id).await?)
    }

    async fn find_profile_by_stripe_account(
        &self,
        account_id: &str,
    ) -> Result<Option<AffiliateProfile>, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(AffiliateProfile::find_by_stripe_account(&mut conn, account_id).await?)
    }

    async fn update_payout_settings(
        &self,
        profile_id: Uuid,
        settings: PayoutSettings,
    ) -> Result<AffiliateProfile, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(
            AffiliateProfile::update_payout_settings(&mut conn, profile_id, &settings, Utc::now())
                .await?,
        )
    }

    async fn update_connect_account(
        &self,
        profile_id: Uuid,
        update: ConnectAccountUpdate,
    ) -> Result<AffiliateProfile, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(
            AffiliateProfile::update_connect_account(&mut conn, profile_id, &update, Utc::now())
                .await?,
        )
    }

    async fn record_click(&self, referral: NewReferral) -> Result<Referral, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(Referral::record_click(&mut conn, &referral, Utc::now()).await?)
    }

    async fn find_referral(&self, referral_id: Uuid) -> Result<Option<Referral>, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(Referral::find_by_id(&mut conn, referral_id).await?)
    }

    async fn list_referrals(
        &self,
        affiliate_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Referral>, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(Referral::list_for_affiliate(&mut conn, affiliate_id, limit).await?)
    }

    async fn record_sale(&self, sale: NewSale) -> Result<SaleRecording, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(Sale::record(&mut conn, &sale, Utc::now()).await?)
    }

    async fn reject_sale_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Sale>, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(Sale::reject_by_payment_intent(&mut conn, payment_intent_id, Utc::now()).await?)
    }

    async fn approve_sales_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(Sale::approve_created_before(&mut conn, cutoff, Utc::now()).await?)
    }

    async fn list_sales(&self, affiliate_id: Uuid, limit: i64) -> Result<Vec<Sale>, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(Sale::list_for_affiliate(&mut conn, affiliate_id, limit).await?)
    }

    async fn reserve_payout(&self, payout: NewPayout) -> Result<Payout, StoreError> {
        let mut conn = self.pool.get().await?;
        Payout::reserve(&mut conn, &payout, Utc::now())
            .await?
            .ok_or(StoreError::InsufficientBalance)
    }

    async fn complete_payout(
        &self,
        payout_id: Uuid,
        transfer_id: &str,
    ) -> Result<Payout, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(Payout::complete(&mut conn, payout_id, transfer_id, Utc::now()).await?)
    }

    async fn fail_payout(&self, payout_id: Uuid, reason: &str) -> Result<Payout, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(Payout::fail(&mut conn, payout_id, reason, Utc::now()).await?)
    }

    async fn list_payouts(
        &self,
        affiliate_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Payout>, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(Payout::list_for_affiliate(&mut conn, affiliate_id, limit).await?)
    }
}
