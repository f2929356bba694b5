// In-process stores with the same semantics as the PostgreSQL ones.
// Used by the unit and integration tests, no database required.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AffiliateStore, BillingStore, ClickMarkerStore, StoreError, UsageStore};
use crate::models::affiliate::{
    released_reservation, settle_oldest_first, AccountStatus, AffiliateProfile, ConnectAccountUpdate,
    NewAffiliateProfile, NewPayout, NewReferral, NewSale, Payout, PayoutSettings, PayoutStatus,
    Referral, Sale, SaleRecording, SaleStatus,
};
use crate::models::payment::NewPayment;
use crate::models::usage::{UsageDelta, UsagePeriod, UsageRecord};
use crate::models::user::{SubscriptionTier, User};

// =============================================================================
// USAGE
// =============================================================================

#[derive(Default)]
pub struct MemoryUsageStore {
    records: Mutex<HashMap<(Uuid, UsagePeriod), UsageRecord>>,
    unavailable: AtomicBool,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the database were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Overwrite a record, for arranging test scenarios
    pub async fn insert_record(&self, record: UsageRecord) {
        let key = (record.user_id, record.period());
        self.records.lock().await.insert(key, record);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn get_or_create(
        &self,
        user_id: Uuid,
        period: UsagePeriod,
        default_limit_cents: i32,
    ) -> Result<UsageRecord, StoreError> {
        self.check_available()?;
        let mut records = self.records.lock().await;
        let record = records
            .entry((user_id, period))
            .or_insert_with(|| UsageRecord::empty(user_id, period, default_limit_cents, Utc::now()));
        Ok(record.clone())
    }

    async fn apply_usage(
        &self,
        user_id: Uuid,
        period: UsagePeriod,
        delta: &UsageDelta,
        default_limit_cents: i32,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord, StoreError> {
        self.check_available()?;
        let mut records = self.records.lock().await;
        let record = records
            .entry((user_id, period))
            .or_insert_with(|| UsageRecord::empty(user_id, period, default_limit_cents, now));
        record.apply(delta, now);
        Ok(record.clone())
    }

    async fn history(&self, user_id: Uuid, limit: i64) -> Result<Vec<UsageRecord>, StoreError> {
        self.check_available()?;
        let records = self.records.lock().await;
        let mut history: Vec<UsageRecord> = records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| (b.year, b.month).cmp(&(a.year, a.month)));
        history.truncate(limit.max(0) as usize);
        Ok(history)
    }
}

// =============================================================================
// AFFILIATES
// =============================================================================

#[derive(Default)]
struct AffiliateTables {
    profiles: HashMap<Uuid, AffiliateProfile>,
    referrals: Vec<Referral>,
    sales: Vec<Sale>,
    payouts: Vec<Payout>,
}

#[derive(Default)]
pub struct MemoryAffiliateStore {
    tables: Mutex<AffiliateTables>,
}

impl MemoryAffiliateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite balance columns, for arranging test scenarios
    pub async fn set_balances(&self, profile_id: Uuid, earned: i64, pending: i64, paid: i64) {
        let mut tables = self.tables.lock().await;
        if let Some(profile) = tables.profiles.get_mut(&profile_id) {
            profile.total_earned_cents = earned;
            profile.pending_balance_cents = pending;
            profile.total_paid_cents = paid;
        }
    }

    pub async fn set_tier(&self, profile_id: Uuid, tier: &str) {
        let mut tables = self.tables.lock().await;
        if let Some(profile) = tables.profiles.get_mut(&profile_id) {
            profile.tier = tier.to_string();
        }
    }

    pub async fn set_active(&self, profile_id: Uuid, is_active: bool) {
        let mut tables = self.tables.lock().await;
        if let Some(profile) = tables.profiles.get_mut(&profile_id) {
            profile.is_active = is_active;
        }
    }

    /// Shift a sale's creation time, for exercising the approval hold
    pub async fn backdate_sale(&self, sale_id: Uuid, created_at: DateTime<Utc>) {
        let mut tables = self.tables.lock().await;
        if let Some(sale) = tables.sales.iter_mut().find(|s| s.id == sale_id) {
            sale.created_at = created_at;
        }
    }

    pub async fn referral_count(&self) -> usize {
        self.tables.lock().await.referrals.len()
    }

    pub async fn sale_count(&self) -> usize {
        self.tables.lock().await.sales.len()
    }
}

fn newest_first<T: Clone>(
    rows: &[T],
    keep: impl Fn(&T) -> bool,
    at: impl Fn(&T) -> DateTime<Utc>,
    limit: i64,
) -> Vec<T> {
    let mut selected: Vec<T> = rows.iter().filter(|r| keep(r)).cloned().collect();
    selected.sort_by_key(|r| std::cmp::Reverse(at(r)));
    selected.truncate(limit.max(0) as usize);
    selected
}

#[async_trait]
impl AffiliateStore for MemoryAffiliateStore {
    async fn create_profile(
        &self,
        new_profile: NewAffiliateProfile,
    ) -> Result<AffiliateProfile, StoreError> {
        let mut tables = self.tables.lock().await;

        if tables.profiles.values().any(|p| p.user_id == new_profile.user_id) {
            return Err(StoreError::Conflict("affiliate_profiles_user_id_key".to_string()));
        }
        if tables
            .profiles
            .values()
            .any(|p| p.affiliate_code == new_profile.affiliate_code)
        {
            return Err(StoreError::Conflict(
                "affiliate_profiles_affiliate_code_key".to_string(),
            ));
        }

        let now = Utc::now();
        let profile = AffiliateProfile {
            id: Uuid::new_v4(),
            user_id: new_profile.user_id,
            affiliate_code: new_profile.affiliate_code,
            is_active: true,
            tier: new_profile.tier,
            total_earned_cents: 0,
            pending_balance_cents: 0,
            total_paid_cents: 0,
            total_clicks: 0,
            total_conversions: 0,
            stripe_account_id: None,
            stripe_onboarding_complete: false,
            stripe_account_status: AccountStatus::NotConnected.as_str().to_string(),
            payout_method: new_profile.payout_method,
            payout_email: None,
            bank_account_holder: None,
            bank_iban: None,
            created_at: now,
            updated_at: now,
        };
        tables.profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    async fn find_profile_by_id(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<AffiliateProfile>, StoreError> {
        Ok(self.tables.lock().await.profiles.get(&profile_id).cloned())
    }

    async fn find_profile_by_code(
        &self,
        code: &str,
    ) -> Result<Option<AffiliateProfile>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .profiles
            .values()
            .find(|p| p.affiliate_code == code)
            .cloned())
    }

    async fn find_profile_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<AffiliateProfile>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.profiles.values().find(|p| p.user_id == user_id).cloned())
    }

    async fn find_profile_by_stripe_account(
        &self,
        account_id: &str,
    ) -> Result<Option<AffiliateProfile>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .profiles
            .values()
            .find(|p| p.stripe_account_id.as_deref() == Some(account_id))
            .cloned())
    }

    async fn update_payout_settings(
        &self,
        profile_id: Uuid,
        settings: PayoutSettings,
    ) -> Result<AffiliateProfile, StoreError> {
        let mut tables = self.tables.lock().await;
        let profile = tables
            .profiles
            .get_mut(&profile_id)
            .ok_or(StoreError::NotFound)?;

        profile.payout_method = settings.payout_method;
        profile.payout_email = settings.payout_email;
        profile.bank_account_holder = settings.bank_account_holder;
        profile.bank_iban = settings.bank_iban;
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    async fn update_connect_account(
        &self,
        profile_id: Uuid,
        update: ConnectAccountUpdate,
    ) -> Result<AffiliateProfile, StoreError> {
        let mut tables = self.tables.lock().await;

        if let Some(account_id) = update.stripe_account_id.as_deref() {
            let taken = tables
                .profiles
                .values()
                .any(|p| p.id != profile_id && p.stripe_account_id.as_deref() == Some(account_id));
            if taken {
                return Err(StoreError::Conflict(
                    "affiliate_profiles_stripe_account_id_key".to_string(),
                ));
            }
        }

        let profile = tables
            .profiles
            .get_mut(&profile_id)
            .ok_or(StoreError::NotFound)?;

        // A missing account id leaves the stored one untouched, like the changeset
        if update.stripe_account_id.is_some() {
            profile.stripe_account_id = update.stripe_account_id;
        }
        profile.stripe_onboarding_complete = update.stripe_onboarding_complete;
        profile.stripe_account_status = update.stripe_account_status;
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    async fn record_click(&self, referral: NewReferral) -> Result<Referral, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        let profile = tables
            .profiles
            .get_mut(&referral.affiliate_id)
            .ok_or(StoreError::NotFound)?;
        profile.total_clicks += 1;
        profile.updated_at = now;

        let row = Referral {
            id: Uuid::new_v4(),
            affiliate_id: referral.affiliate_id,
            affiliate_code: referral.affiliate_code,
            ip_address: referral.ip_address,
            user_agent: referral.user_agent,
            referrer_url: referral.referrer_url,
            landing_page: referral.landing_page,
            created_at: now,
        };
        tables.referrals.push(row.clone());
        Ok(row)
    }

    async fn find_referral(&self, referral_id: Uuid) -> Result<Option<Referral>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.referrals.iter().find(|r| r.id == referral_id).cloned())
    }

    async fn list_referrals(
        &self,
        affiliate_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Referral>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(newest_first(
            &tables.referrals,
            |r| r.affiliate_id == affiliate_id,
            |r| r.created_at,
            limit,
        ))
    }

    async fn record_sale(&self, sale: NewSale) -> Result<SaleRecording, StoreError> {
        let mut tables = self.tables.lock().await;

        if let Some(existing) = tables
            .sales
            .iter()
            .find(|s| s.external_payment_id == sale.external_payment_id)
        {
            return Ok(SaleRecording::AlreadyRecorded(existing.clone()));
        }

        if let Some(referral_id) = sale.referral_id {
            if !tables.referrals.iter().any(|r| r.id == referral_id) {
                return Err(StoreError::Database(
                    "insert or update on table \"affiliate_sales\" violates foreign key constraint \"affiliate_sales_referral_id_fkey\"".to_string(),
                ));
            }
        }

        let now = Utc::now();
        let profile = tables
            .profiles
            .get_mut(&sale.affiliate_id)
            .ok_or(StoreError::NotFound)?;
        profile.total_earned_cents += sale.commission_cents;
        profile.pending_balance_cents += sale.commission_cents;
        profile.total_conversions += 1;
        profile.updated_at = now;

        let row = Sale {
            id: Uuid::new_v4(),
            affiliate_id: sale.affiliate_id,
            referral_id: sale.referral_id,
            customer_email: sale.customer_email,
            customer_id: sale.customer_id,
            external_payment_id: sale.external_payment_id,
            payment_intent_id: sale.payment_intent_id,
            product_id: sale.product_id,
            price_id: sale.price_id,
            sale_amount_cents: sale.sale_amount_cents,
            commission_rate_bps: sale.commission_rate_bps,
            commission_cents: sale.commission_cents,
            currency: sale.currency,
            status: sale.status,
            payout_id: None,
            approved_at: None,
            paid_at: None,
            rejected_at: None,
            created_at: now,
            updated_at: now,
        };
        tables.sales.push(row.clone());
        Ok(SaleRecording::Created(row))
    }

    async fn reject_sale_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Sale>, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        let Some(index) = tables.sales.iter().position(|s| {
            s.payment_intent_id.as_deref() == Some(payment_intent_id)
                && (s.status == SaleStatus::Pending.as_str()
                    || s.status == SaleStatus::Approved.as_str())
        }) else {
            return Ok(None);
        };

        let (affiliate_id, commission) = {
            let sale = &mut tables.sales[index];
            sale.status = SaleStatus::Rejected.as_str().to_string();
            sale.rejected_at = Some(now);
            sale.updated_at = now;
            (sale.affiliate_id, sale.commission_cents)
        };

        if let Some(profile) = tables.profiles.get_mut(&affiliate_id) {
            profile.total_earned_cents -= commission;
            profile.pending_balance_cents = (profile.pending_balance_cents - commission).max(0);
            profile.updated_at = now;
        }

        Ok(Some(tables.sales[index].clone()))
    }

    async fn approve_sales_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let mut approved = 0;

        for sale in tables
            .sales
            .iter_mut()
            .filter(|s| s.status == SaleStatus::Pending.as_str() && s.created_at < cutoff)
        {
            sale.status = SaleStatus::Approved.as_str().to_string();
            sale.approved_at = Some(now);
            sale.updated_at = now;
            approved += 1;
        }

        Ok(approved)
    }

    async fn list_sales(&self, affiliate_id: Uuid, limit: i64) -> Result<Vec<Sale>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(newest_first(
            &tables.sales,
            |s| s.affiliate_id == affiliate_id,
            |s| s.created_at,
            limit,
        ))
    }

    async fn reserve_payout(&self, payout: NewPayout) -> Result<Payout, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        let profile = tables
            .profiles
            .get_mut(&payout.affiliate_id)
            .ok_or(StoreError::NotFound)?;
        if profile.pending_balance_cents < payout.amount_cents {
            return Err(StoreError::InsufficientBalance);
        }
        profile.pending_balance_cents -= payout.amount_cents;
        profile.updated_at = now;

        let row = Payout {
            id: Uuid::new_v4(),
            affiliate_id: payout.affiliate_id,
            amount_cents: payout.amount_cents,
            currency: payout.currency,
            payout_method: payout.payout_method,
            status: payout.status,
            external_transfer_id: None,
            failure_reason: None,
            requested_at: now,
            processed_at: None,
            completed_at: None,
            failed_at: None,
        };
        tables.payouts.push(row.clone());
        Ok(row)
    }

    async fn complete_payout(
        &self,
        payout_id: Uuid,
        transfer_id: &str,
    ) -> Result<Payout, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        let payout = tables
            .payouts
            .iter_mut()
            .find(|p| p.id == payout_id && p.status == PayoutStatus::Processing.as_str())
            .ok_or(StoreError::NotFound)?;
        payout.status = PayoutStatus::Completed.as_str().to_string();
        payout.external_transfer_id = Some(transfer_id.to_string());
        payout.processed_at = Some(now);
        payout.completed_at = Some(now);
        let payout = payout.clone();

        if let Some(profile) = tables.profiles.get_mut(&payout.affiliate_id) {
            profile.total_paid_cents += payout.amount_cents;
            profile.updated_at = now;
        }

        let mut approved: Vec<&Sale> = tables
            .sales
            .iter()
            .filter(|s| {
                s.affiliate_id == payout.affiliate_id && s.status == SaleStatus::Approved.as_str()
            })
            .collect();
        approved.sort_by_key(|s| s.created_at);
        let candidates: Vec<(Uuid, i64)> =
            approved.iter().map(|s| (s.id, s.commission_cents)).collect();
        let settled = settle_oldest_first(&candidates, payout.amount_cents);

        for sale in tables.sales.iter_mut().filter(|s| settled.contains(&s.id)) {
            sale.status = SaleStatus::Paid.as_str().to_string();
            sale.paid_at = Some(now);
            sale.payout_id = Some(payout.id);
            sale.updated_at = now;
        }

        Ok(payout)
    }

    async fn fail_payout(&self, payout_id: Uuid, reason: &str) -> Result<Payout, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        let payout = tables
            .payouts
            .iter_mut()
            .find(|p| p.id == payout_id && p.status == PayoutStatus::Processing.as_str())
            .ok_or(StoreError::NotFound)?;
        payout.status = PayoutStatus::Failed.as_str().to_string();
        payout.failure_reason = Some(reason.to_string());
        payout.processed_at = Some(now);
        payout.failed_at = Some(now);
        let payout = payout.clone();

        let other_in_flight: i64 = tables
            .payouts
            .iter()
            .filter(|p| {
                p.affiliate_id == payout.affiliate_id
                    && p.status == PayoutStatus::Processing.as_str()
            })
            .map(|p| p.amount_cents)
            .sum();
        if let Some(profile) = tables.profiles.get_mut(&payout.affiliate_id) {
            let released = released_reservation(payout.amount_cents, profile, other_in_flight);
            profile.pending_balance_cents += released;
            profile.updated_at = now;
        }

        Ok(payout)
    }

    async fn list_payouts(
        &self,
        affiliate_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Payout>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(newest_first(
            &tables.payouts,
            |p| p.affiliate_id == affiliate_id,
            |p| p.requested_at,
            limit,
        ))
    }
}

// =============================================================================
// BILLING
// =============================================================================

#[derive(Default)]
pub struct MemoryBillingStore {
    users: Mutex<HashMap<Uuid, User>>,
    payments: Mutex<Vec<NewPayment>>,
}

impl MemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, id: Uuid, email: &str) -> User {
        let now = Utc::now();
        let user = User {
            id,
            email: email.trim().to_lowercase(),
            is_subscribed: false,
            subscription_tier: SubscriptionTier::Free.as_str().to_string(),
            stripe_customer_id: None,
            subscribed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.users.lock().await.insert(id, user.clone());
        user
    }

    pub async fn user(&self, id: Uuid) -> Option<User> {
        self.users.lock().await.get(&id).cloned()
    }

    pub async fn payments(&self) -> Vec<NewPayment> {
        self.payments.lock().await.clone()
    }
}

#[async_trait]
impl BillingStore for MemoryBillingStore {
    async fn mark_subscribed(
        &self,
        email: &str,
        stripe_customer_id: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        let normalized = email.trim().to_lowercase();
        let mut users = self.users.lock().await;
        let now = Utc::now();

        Ok(users.values_mut().find(|u| u.email == normalized).map(|user| {
            user.is_subscribed = true;
            user.subscription_tier = SubscriptionTier::Premium.as_str().to_string();
            user.stripe_customer_id = stripe_customer_id.map(str::to_string);
            user.subscribed_at = Some(now);
            user.updated_at = now;
            user.clone()
        }))
    }

    async fn record_payment(&self, payment: NewPayment) -> Result<bool, StoreError> {
        let mut payments = self.payments.lock().await;
        let duplicate = payment.provider_payment_id.is_some()
            && payments
                .iter()
                .any(|p| p.provider_payment_id == payment.provider_payment_id);
        if duplicate {
            return Ok(false);
        }
        payments.push(payment);
        Ok(true)
    }

    async fn cancel_subscription(
        &self,
        stripe_customer_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let mut users = self.users.lock().await;
        let now = Utc::now();

        Ok(users
            .values_mut()
            .find(|u| u.stripe_customer_id.as_deref() == Some(stripe_customer_id))
            .map(|user| {
                user.is_subscribed = false;
                user.subscription_tier = SubscriptionTier::Free.as_str().to_string();
                user.updated_at = now;
                user.clone()
            }))
    }
}

// =============================================================================
// CLICK MARKERS
// =============================================================================

#[derive(Default)]
pub struct MemoryClickMarkers {
    markers: Mutex<HashMap<String, (Uuid, DateTime<Utc>)>>,
    unavailable: AtomicBool,
}

impl MemoryClickMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Cache("marker store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ClickMarkerStore for MemoryClickMarkers {
    async fn get(&self, key: &str) -> Result<Option<Uuid>, StoreError> {
        self.check_available()?;
        let markers = self.markers.lock().await;
        Ok(markers
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Utc::now())
            .map(|(referral_id, _)| *referral_id))
    }

    async fn put(&self, key: &str, referral_id: Uuid, ttl_seconds: u64) -> Result<(), StoreError> {
        self.check_available()?;
        let mut markers = self.markers.lock().await;
        let now = Utc::now();
        let live = markers
            .get(key)
            .map(|(_, expires_at)| *expires_at > now)
            .unwrap_or(false);
        if !live {
            let expires_at = now + chrono::Duration::seconds(ttl_seconds as i64);
            markers.insert(key.to_string(), (referral_id, expires_at));
        }
        Ok(())
    }
}
