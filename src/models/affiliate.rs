// Affiliate program models: profiles, referral clicks, commissioned sales and payouts

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::schema::{affiliate_payouts, affiliate_profiles, affiliate_referrals, affiliate_sales};

// ============================================================================
// ENUMERATIONS
// ============================================================================

/// Commission tier of an affiliate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AffiliateTier {
    Standard,
    Silver,
    Gold,
}

impl AffiliateTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            AffiliateTier::Standard => "standard",
            AffiliateTier::Silver => "silver",
            AffiliateTier::Gold => "gold",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(AffiliateTier::Standard),
            "silver" => Some(AffiliateTier::Silver),
            "gold" => Some(AffiliateTier::Gold),
            _ => None,
        }
    }

    /// Commission rate in basis points (1/100 of a percent)
    pub fn commission_rate_bps(&self) -> i32 {
        match self {
            AffiliateTier::Standard => 2000,
            AffiliateTier::Silver => 2500,
            AffiliateTier::Gold => 3000,
        }
    }
}

/// Status of the affiliate's connected payout account at the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    NotConnected,
    Pending,
    Active,
    Restricted,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::NotConnected => "not_connected",
            AccountStatus::Pending => "pending",
            AccountStatus::Active => "active",
            AccountStatus::Restricted => "restricted",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "not_connected" => Some(AccountStatus::NotConnected),
            "pending" => Some(AccountStatus::Pending),
            "active" => Some(AccountStatus::Active),
            "restricted" => Some(AccountStatus::Restricted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PayoutMethod {
    Stripe,
    BankTransfer,
}

impl PayoutMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutMethod::Stripe => "stripe",
            PayoutMethod::BankTransfer => "bank_transfer",
        }
    }
}

impl FromStr for PayoutMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stripe" => Ok(PayoutMethod::Stripe),
            "bank_transfer" | "bank" => Ok(PayoutMethod::BankTransfer),
            other => Err(format!(
                "Invalid payoutMethod '{}': expected stripe or bank_transfer",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaleStatus {
    Pending,
    Approved,
    Paid,
    Rejected,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Pending => "pending",
            SaleStatus::Approved => "approved",
            SaleStatus::Paid => "paid",
            SaleStatus::Rejected => "rejected",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SaleStatus::Pending),
            "approved" => Some(SaleStatus::Approved),
            "paid" => Some(SaleStatus::Paid),
            "rejected" => Some(SaleStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayoutStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Completed => "completed",
            PayoutStatus::Failed => "failed",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PayoutStatus::Pending),
            "processing" => Some(PayoutStatus::Processing),
            "completed" => Some(PayoutStatus::Completed),
            "failed" => Some(PayoutStatus::Failed),
            _ => None,
        }
    }
}

// ============================================================================
// AFFILIATE PROFILE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = affiliate_profiles)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AffiliateProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub affiliate_code: String,
    pub is_active: bool,
    pub tier: String,
    pub total_earned_cents: i64,
    pub pending_balance_cents: i64,
    pub total_paid_cents: i64,
    pub total_clicks: i32,
    pub total_conversions: i32,
    pub stripe_account_id: Option<String>,
    pub stripe_onboarding_complete: bool,
    pub stripe_account_status: String,
    pub payout_method: String,
    pub payout_email: Option<String>,
    pub bank_account_holder: Option<String>,
    pub bank_iban: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = affiliate_profiles)]
pub struct NewAffiliateProfile {
    pub user_id: Uuid,
    pub affiliate_code: String,
    pub tier: String,
    pub payout_method: String,
}

/// Payout preferences written by the affiliate
#[derive(Debug, Clone, PartialEq, AsChangeset)]
#[diesel(table_name = affiliate_profiles)]
#[diesel(treat_none_as_null = true)]
pub struct PayoutSettings {
    pub payout_method: String,
    pub payout_email: Option<String>,
    pub bank_account_holder: Option<String>,
    pub bank_iban: Option<String>,
}

/// Processor-side account state mirrored onto the profile
#[derive(Debug, Clone, PartialEq, AsChangeset)]
#[diesel(table_name = affiliate_profiles)]
pub struct ConnectAccountUpdate {
    pub stripe_account_id: Option<String>,
    pub stripe_onboarding_complete: bool,
    pub stripe_account_status: String,
}

impl AffiliateProfile {
    pub fn tier(&self) -> AffiliateTier {
        AffiliateTier::from_string(&self.tier).unwrap_or(AffiliateTier::Standard)
    }

    pub fn account_status(&self) -> AccountStatus {
        AccountStatus::from_string(&self.stripe_account_status)
            .unwrap_or(AccountStatus::NotConnected)
    }

    /// Locally cached view of whether payouts can be attempted
    pub fn payout_account_ready(&self) -> bool {
        self.stripe_account_id.is_some() && self.stripe_onboarding_complete
    }

    pub async fn insert(
        conn: &mut AsyncPgConnection,
        new_profile: &NewAffiliateProfile,
    ) -> Result<Self, diesel::result::Error> {
        use crate::schema::affiliate_profiles::dsl;

        diesel::insert_into(dsl::affiliate_profiles)
            .values(new_profile)
            .returning(AffiliateProfile::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn find_by_id(
        conn: &mut AsyncPgConnection,
        profile_id: Uuid,
    ) -> Result<Option<Self>, diesel::result::Error> {
        use crate::schema::affiliate_profiles::dsl;

        dsl::affiliate_profiles
            .find(profile_id)
            .select(AffiliateProfile::as_select())
            .first(conn)
            .await
            .optional()
    }

    /// Codes are stored upper-case, callers pass a normalised code
    pub async fn find_by_code(
        conn: &mut AsyncPgConnection,
        code: &str,
    ) -> Result<Option<Self>, diesel::result::Error> {
        use crate::schema::affiliate_profiles::dsl;

        dsl::affiliate_profiles
            .filter(dsl::affiliate_code.eq(code))
            .select(AffiliateProfile::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub async fn find_by_user_id(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> Result<Option<Self>, diesel::result::Error> {
        use crate::schema::affiliate_profiles::dsl;

        dsl::affiliate_profiles
            .filter(dsl::user_id.eq(user_id))
            .select(AffiliateProfile::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub async fn find_by_stripe_account(
        conn: &mut AsyncPgConnection,
        account_id: &str,
    ) -> Result<Option<Self>, diesel::result::Error> {
        use crate::schema::affiliate_profiles::dsl;

        dsl::affiliate_profiles
            .filter(dsl::stripe_account_id.eq(account_id))
            .select(AffiliateProfile::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub async fn update_payout_settings(
        conn: &mut AsyncPgConnection,
        profile_id: Uuid,
        settings: &PayoutSettings,
        now: DateTime<Utc>,
    ) -> Result<Self, diesel::result::Error> {
        use crate::schema::affiliate_profiles::dsl;

        diesel::update(dsl::affiliate_profiles.find(profile_id))
            .set((settings, dsl::updated_at.eq(now)))
            .returning(AffiliateProfile::as_returning())
            .get_result(conn)
            .await
    }

    pub async fn update_connect_account(
        conn: &mut AsyncPgConnection,
        profile_id: Uuid,
        update: &ConnectAccountUpdate,
        now: DateTime<Utc>,
    ) -> Result<Self, diesel::result::Error> {
        use crate::schema::affiliate_profiles::dsl;

        diesel::update(dsl::affiliate_profiles.find(profile_id))
            .set((update, dsl::updated_at.eq(now)))
            .returning(AffiliateProfile::as_returning())
            .get_result(conn)
            .await
    }
}

// ============================================================================
// REFERRALS (CLICKS)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable, ToSchema)]
#[diesel(table_name = affiliate_referrals)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Referral {
    pub id: Uuid,
    pub affiliate_id: Uuid,
    pub affiliate_code: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub referrer_url: Option<String>,
    pub landing_page: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = affiliate_referrals)]
pub struct NewReferral {
    pub affiliate_id: Uuid,
    pub affiliate_code: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub referrer_url: Option<String>,
    pub landing_page: Option<String>,
}

impl Referral {
    /// Insert the click and bump the affiliate's click counter in one transaction
    pub async fn record_click(
        conn: &mut AsyncPgConnection,
        new_referral: &NewReferral,
        now: DateTime<Utc>,
    ) -> Result<Self, diesel::result::Error> {
        use crate::schema::affiliate_profiles::dsl as profiles;
        use crate::schema::affiliate_referrals::dsl as referrals;

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                let referral = diesel::insert_into(referrals::affiliate_referrals)
                    .values(new_referral)
                    .returning(Referral::as_returning())
                    .get_result(conn)
                    .await?;

                diesel::update(profiles::affiliate_profiles.find(new_referral.affiliate_id))
                    .set((
                        profiles::total_clicks.eq(profiles::total_clicks + 1),
                        profiles::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .await?;

                Ok(referral)
            }
            .scope_boxed()
        })
        .await
    }

    pub async fn find_by_id(
        conn: &mut AsyncPgConnection,
        referral_id: Uuid,
    ) -> Result<Option<Self>, diesel::result::Error> {
        use crate::schema::affiliate_referrals::dsl;

        dsl::affiliate_referrals
            .find(referral_id)
            .select(Referral::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub async fn list_for_affiliate(
        conn: &mut AsyncPgConnection,
        affiliate_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, diesel::result::Error> {
        use crate::schema::affiliate_referrals::dsl;

        dsl::affiliate_referrals
            .filter(dsl::affiliate_id.eq(affiliate_id))
            .order(dsl::created_at.desc())
            .limit(limit)
            .select(Referral::as_select())
            .load(conn)
            .await
    }
}

// ============================================================================
// SALES (COMMISSIONS)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable, ToSchema)]
#[diesel(table_name = affiliate_sales)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Sale {
    pub id: Uuid,
    pub affiliate_id: Uuid,
    pub referral_id: Option<Uuid>,
    pub customer_email: Option<String>,
    pub customer_id: Option<String>,
    pub external_payment_id: String,
    pub payment_intent_id: Option<String>,
    pub product_id: Option<String>,
    pub price_id: Option<String>,
    pub sale_amount_cents: i64,
    pub commission_rate_bps: i32,
    pub commission_cents: i64,
    pub currency: String,
    pub status: String,
    pub payout_id: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = affiliate_sales)]
pub struct NewSale {
    pub affiliate_id: Uuid,
    pub referral_id: Option<Uuid>,
    pub customer_email: Option<String>,
    pub customer_id: Option<String>,
    pub external_payment_id: String,
    pub payment_intent_id: Option<String>,
    pub product_id: Option<String>,
    pub price_id: Option<String>,
    pub sale_amount_cents: i64,
    pub commission_rate_bps: i32,
    pub commission_cents: i64,
    pub currency: String,
    pub status: String,
}

/// Outcome of recording a sale keyed by its external payment id
#[derive(Debug, Clone)]
pub enum SaleRecording {
    Created(Sale),
    AlreadyRecorded(Sale),
}

impl SaleRecording {
    pub fn sale(&self) -> &Sale {
        match self {
            SaleRecording::Created(sale) | SaleRecording::AlreadyRecorded(sale) => sale,
        }
    }
}

/// Pick approved commissions to settle with a payout, oldest first,
/// stopping at the first one that no longer fits in the remaining amount
pub fn settle_oldest_first(approved: &[(Uuid, i64)], amount_cents: i64) -> Vec<Uuid> {
    let mut remaining = amount_cents;
    let mut settled = Vec::new();

    for (sale_id, commission_cents) in approved {
        if *commission_cents > remaining {
            break;
        }
        remaining -= commission_cents;
        settled.push(*sale_id);
    }

    settled
}

/// Share of a failed payout's reservation that goes back to the pending balance.
/// A refund during the transfer may already have taken part of it, so the
/// restore stops where pending would exceed earned minus paid minus the
/// other payouts still in flight.
pub fn released_reservation(
    amount_cents: i64,
    profile: &AffiliateProfile,
    other_in_flight_cents: i64,
) -> i64 {
    let headroom = profile.total_earned_cents
        - profile.total_paid_cents
        - profile.pending_balance_cents
        - other_in_flight_cents;
    amount_cents.min(headroom.max(0))
}

impl Sale {
    /// Insert a pending sale and credit the affiliate. Redelivery of the same
    /// external payment returns the existing row without crediting again.
    pub async fn record(
        conn: &mut AsyncPgConnection,
        new_sale: &NewSale,
        now: DateTime<Utc>,
    ) -> Result<SaleRecording, diesel::result::Error> {
        use crate::schema::affiliate_profiles::dsl as profiles;
        use crate::schema::affiliate_sales::dsl as sales;

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                let inserted = diesel::insert_into(sales::affiliate_sales)
                    .values(new_sale)
                    .on_conflict(sales::external_payment_id)
                    .do_nothing()
                    .returning(Sale::as_returning())
                    .get_result(conn)
                    .await
                    .optional()?;

                match inserted {
                    Some(sale) => {
                        diesel::update(profiles::affiliate_profiles.find(sale.affiliate_id))
                            .set((
                                profiles::total_earned_cents
                                    .eq(profiles::total_earned_cents + sale.commission_cents),
                                profiles::pending_balance_cents
                                    .eq(profiles::pending_balance_cents + sale.commission_cents),
                                profiles::total_conversions.eq(profiles::total_conversions + 1),
                                profiles::updated_at.eq(now),
                            ))
                            .execute(conn)
                            .await?;
                        Ok(SaleRecording::Created(sale))
                    },
                    None => {
                        let existing = sales::affiliate_sales
                            .filter(sales::external_payment_id.eq(&new_sale.external_payment_id))
                            .select(Sale::as_select())
                            .first(conn)
                            .await?;
                        Ok(SaleRecording::AlreadyRecorded(existing))
                    },
                }
            }
            .scope_boxed()
        })
        .await
    }

    /// Reject an unpaid sale after a refund and take its commission back
    pub async fn reject_by_payment_intent(
        conn: &mut AsyncPgConnection,
        payment_intent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, diesel::result::Error> {
        use crate::schema::affiliate_profiles::dsl as profiles;
        use crate::schema::affiliate_sales::dsl as sales;

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                let sale = sales::affiliate_sales
                    .filter(sales::payment_intent_id.eq(payment_intent_id))
                    .filter(sales::status.eq_any(vec![
                        SaleStatus::Pending.as_str(),
                        SaleStatus::Approved.as_str(),
                    ]))
                    .select(Sale::as_select())
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?;

                let Some(sale) = sale else {
                    return Ok(None);
                };

                let profile = profiles::affiliate_profiles
                    .find(sale.affiliate_id)
                    .select(AffiliateProfile::as_select())
                    .for_update()
                    .first(conn)
                    .await?;

                // Part of the balance may already be reserved by an in-flight payout
                let pending = (profile.pending_balance_cents - sale.commission_cents).max(0);

                diesel::update(profiles::affiliate_profiles.find(profile.id))
                    .set((
                        profiles::total_earned_cents
                            .eq(profiles::total_earned_cents - sale.commission_cents),
                        profiles::pending_balance_cents.eq(pending),
                        profiles::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .await?;

                let rejected = diesel::update(sales::affiliate_sales.find(sale.id))
                    .set((
                        sales::status.eq(SaleStatus::Rejected.as_str()),
                        sales::rejected_at.eq(now),
                        sales::updated_at.eq(now),
                    ))
                    .returning(Sale::as_returning())
                    .get_result(conn)
                    .await?;

                Ok(Some(rejected))
            }
            .scope_boxed()
        })
        .await
    }

    /// Move pending sales created before the cutoff to approved
    pub async fn approve_created_before(
        conn: &mut AsyncPgConnection,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, diesel::result::Error> {
        use crate::schema::affiliate_sales::dsl;

        diesel::update(
            dsl::affiliate_sales
                .filter(dsl::status.eq(SaleStatus::Pending.as_str()))
                .filter(dsl::created_at.lt(cutoff)),
        )
        .set((
            dsl::status.eq(SaleStatus::Approved.as_str()),
            dsl::approved_at.eq(now),
            dsl::updated_at.eq(now),
        ))
        .execute(conn)
        .await
    }

    pub async fn list_for_affiliate(
        conn: &mut AsyncPgConnection,
        affiliate_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, diesel::result::Error> {
        use crate::schema::affiliate_sales::dsl;

        dsl::affiliate_sales
            .filter(dsl::affiliate_id.eq(affiliate_id))
            .order(dsl::created_at.desc())
            .limit(limit)
            .select(Sale::as_select())
            .load(conn)
            .await
    }
}

// ============================================================================
// PAYOUTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable, ToSchema)]
#[diesel(table_name = affiliate_payouts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Payout {
    pub id: Uuid,
    pub affiliate_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub payout_method: String,
    pub status: String,
    pub external_transfer_id: Option<String>,
    pub failure_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = affiliate_payouts)]
pub struct NewPayout {
    pub affiliate_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub payout_method: String,
    pub status: String,
}

impl Payout {
    /// Take the amount out of the pending balance and open a processing payout.
    /// Returns None when the balance does not cover the amount.
    pub async fn reserve(
        conn: &mut AsyncPgConnection,
        new_payout: &NewPayout,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, diesel::result::Error> {
        use crate::schema::affiliate_payouts::dsl as payouts;
        use crate::schema::affiliate_profiles::dsl as profiles;

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                let reserved = diesel::update(
                    profiles::affiliate_profiles
                        .filter(profiles::id.eq(new_payout.affiliate_id))
                        .filter(profiles::pending_balance_cents.ge(new_payout.amount_cents)),
                )
                .set((
                    profiles::pending_balance_cents
                        .eq(profiles::pending_balance_cents - new_payout.amount_cents),
                    profiles::updated_at.eq(now),
                ))
                .execute(conn)
                .await?;

                if reserved == 0 {
                    return Ok(None);
                }

                let payout = diesel::insert_into(payouts::affiliate_payouts)
                    .values(new_payout)
                    .returning(Payout::as_returning())
                    .get_result(conn)
                    .await?;

                Ok(Some(payout))
            }
            .scope_boxed()
        })
        .await
    }

    /// Close a processing payout as completed and settle approved sales
    pub async fn complete(
        conn: &mut AsyncPgConnection,
        payout_id: Uuid,
        transfer_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, diesel::result::Error> {
        use crate::schema::affiliate_payouts::dsl as payouts;
        use crate::schema::affiliate_profiles::dsl as profiles;
        use crate::schema::affiliate_sales::dsl as sales;

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                let payout = diesel::update(
                    payouts::affiliate_payouts
                        .filter(payouts::id.eq(payout_id))
                        .filter(payouts::status.eq(PayoutStatus::Processing.as_str())),
                )
                .set((
                    payouts::status.eq(PayoutStatus::Completed.as_str()),
                    payouts::external_transfer_id.eq(transfer_id),
                    payouts::processed_at.eq(now),
                    payouts::completed_at.eq(now),
                ))
                .returning(Payout::as_returning())
                .get_result(conn)
                .await?;

                diesel::update(profiles::affiliate_profiles.find(payout.affiliate_id))
                    .set((
                        profiles::total_paid_cents
                            .eq(profiles::total_paid_cents + payout.amount_cents),
                        profiles::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .await?;

                let approved: Vec<(Uuid, i64)> = sales::affiliate_sales
                    .filter(sales::affiliate_id.eq(payout.affiliate_id))
                    .filter(sales::status.eq(SaleStatus::Approved.as_str()))
                    .order(sales::created_at.asc())
                    .select((sales::id, sales::commission_cents))
                    .for_update()
                    .load(conn)
                    .await?;

                let settled = settle_oldest_first(&approved, payout.amount_cents);
                if !settled.is_empty() {
                    diesel::update(sales::affiliate_sales.filter(sales::id.eq_any(settled)))
                        .set((
                            sales::status.eq(SaleStatus::Paid.as_str()),
                            sales::paid_at.eq(now),
                            sales::payout_id.eq(payout.id),
                            sales::updated_at.eq(now),
                        ))
                        .execute(conn)
                        .await?;
                }

                Ok(payout)
            }
            .scope_boxed()
        })
        .await
    }

    /// Close a processing payout as failed and release its reservation
    pub async fn fail(
        conn: &mut AsyncPgConnection,
        payout_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, diesel::result::Error> {
        use crate::schema::affiliate_payouts::dsl as payouts;
        use crate::schema::affiliate_profiles::dsl as profiles;

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                let payout = diesel::update(
                    payouts::affiliate_payouts
                        .filter(payouts::id.eq(payout_id))
                        .filter(payouts::status.eq(PayoutStatus::Processing.as_str())),
                )
                .set((
                    payouts::status.eq(PayoutStatus::Failed.as_str()),
                    payouts::failure_reason.eq(reason),
                    payouts::processed_at.eq(now),
                    payouts::failed_at.eq(now),
                ))
                .returning(Payout::as_returning())
                .get_result(conn)
                .await?;

                let profile = profiles::affiliate_profiles
                    .find(payout.affiliate_id)
                    .select(AffiliateProfile::as_select())
                    .for_update()
                    .first(conn)
                    .await?;

                let other_in_flight: Vec<i64> = payouts::affiliate_payouts
                    .filter(payouts::affiliate_id.eq(payout.affiliate_id))
                    .filter(payouts::status.eq(PayoutStatus::Processing.as_str()))
                    .select(payouts::amount_cents)
                    .load(conn)
                    .await?;
                let released = released_reservation(
                    payout.amount_cents,
                    &profile,
                    other_in_flight.iter().sum(),
                );

                diesel::update(profiles::affiliate_profiles.find(profile.id))
                    .set((
                        profiles::pending_balance_cents
                            .eq(profiles::pending_balance_cents + released),
                        profiles::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .await?;

                Ok(payout)
            }
            .scope_boxed()
        })
        .await
    }

    pub async fn list_for_affiliate(
        conn: &mut AsyncPgConnection,
        affiliate_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, diesel::result::Error> {
        use crate::schema::affiliate_payouts::dsl;

        dsl::affiliate_payouts
            .filter(dsl::affiliate_id.eq(affiliate_id))
            .order(dsl::requested_at.desc())
            .limit(limit)
            .select(Payout::as_select())
            .load(conn)
            .await
    }
}

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackClickRequest {
    #[validate(length(min = 1, max = 64, message = "affiliateCode is required"))]
    pub affiliate_code: String,
    #[validate(length(max = 2048))]
    pub referrer_url: Option<String>,
    #[validate(length(max = 2048))]
    pub landing_page: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackClickResponse {
    pub success: bool,
    pub referral_id: Uuid,
    pub affiliate_code: String,
    /// True when the click was already recorded within the dedupe window
    pub duplicate: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateAffiliateRequest {
    /// Optional custom code; generated when absent
    pub affiliate_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayoutSettingsRequest {
    pub payout_method: String,
    #[validate(email(message = "payoutEmail must be a valid email"))]
    pub payout_email: Option<String>,
    #[validate(length(min = 2, max = 255))]
    pub bank_account_holder: Option<String>,
    pub bank_iban: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PayoutRequest {
    /// Amount in minor currency units
    pub amount: i64,
    pub payout_method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PayoutResponse {
    pub success: bool,
    pub payout: Payout,
    pub transfer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AffiliateProfileResponse {
    pub id: Uuid,
    pub affiliate_code: String,
    pub is_active: bool,
    pub tier: AffiliateTier,
    pub commission_rate_bps: i32,
    pub total_earned_cents: i64,
    pub pending_balance_cents: i64,
    pub total_paid_cents: i64,
    pub total_clicks: i32,
    pub total_conversions: i32,
    pub stripe_account_status: AccountStatus,
    pub stripe_onboarding_complete: bool,
    pub payout_method: String,
    pub payout_email: Option<String>,
    pub bank_account_holder: Option<String>,
    /// Only the last four characters are exposed
    pub bank_iban_masked: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<AffiliateProfile> for AffiliateProfileResponse {
    fn from(profile: AffiliateProfile) -> Self {
        let tier = profile.tier();
        let status = profile.account_status();
        Self {
            id: profile.id,
            affiliate_code: profile.affiliate_code,
            is_active: profile.is_active,
            tier,
            commission_rate_bps: tier.commission_rate_bps(),
            total_earned_cents: profile.total_earned_cents,
            pending_balance_cents: profile.pending_balance_cents,
            total_paid_cents: profile.total_paid_cents,
            total_clicks: profile.total_clicks,
            total_conversions: profile.total_conversions,
            stripe_account_status: status,
            stripe_onboarding_complete: profile.stripe_onboarding_complete,
            payout_method: profile.payout_method,
            payout_email: profile.payout_email,
            bank_account_holder: profile.bank_account_holder,
            bank_iban_masked: profile.bank_iban.as_deref().map(mask_iban),
            created_at: profile.created_at,
        }
    }
}

fn mask_iban(iban: &str) -> String {
    let visible: String = iban
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{}", visible)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectOnboardingResponse {
    pub account_id: String,
    pub onboarding_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectStatusResponse {
    pub account_id: Option<String>,
    pub status: AccountStatus,
    pub onboarding_complete: bool,
    pub payouts_enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ListQuery {
    #[validate(range(min = 1, max = 200))]
    pub limit: Option<i64>,
}

impl ListQuery {
    pub fn limit_or_default(&self) -> i64 {
        self.limit.unwrap_or(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_rates() {
        assert_eq!(AffiliateTier::Standard.commission_rate_bps(), 2000);
        assert_eq!(AffiliateTier::Silver.commission_rate_bps(), 2500);
        assert_eq!(AffiliateTier::Gold.commission_rate_bps(), 3000);
        assert_eq!(AffiliateTier::from_string("platinum"), None);
    }

    #[test]
    fn test_payout_method_parsing() {
        assert_eq!("stripe".parse::<PayoutMethod>(), Ok(PayoutMethod::Stripe));
        assert_eq!(
            "BANK_TRANSFER".parse::<PayoutMethod>(),
            Ok(PayoutMethod::BankTransfer)
        );
        assert!("paypal".parse::<PayoutMethod>().is_err());
    }

    #[test]
    fn test_settle_oldest_first_stops_at_first_misfit() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let approved = vec![(a, 100), (b, 150), (c, 50)];

        assert_eq!(settle_oldest_first(&approved, 300), vec![a, b, c]);
        assert_eq!(settle_oldest_first(&approved, 200), vec![a]);
        assert!(settle_oldest_first(&approved, 99).is_empty());
    }

    fn balances(earned: i64, pending: i64, paid: i64) -> AffiliateProfile {
        let now = Utc::now();
        AffiliateProfile {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            affiliate_code: "CHEF".to_string(),
            is_active: true,
            tier: "standard".to_string(),
            total_earned_cents: earned,
            pending_balance_cents: pending,
            total_paid_cents: paid,
            total_clicks: 0,
            total_conversions: 0,
            stripe_account_id: None,
            stripe_onboarding_complete: false,
            stripe_account_status: "not_connected".to_string(),
            payout_method: "stripe".to_string(),
            payout_email: None,
            bank_account_holder: None,
            bank_iban: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_released_reservation_respects_refunds() {
        // Untouched reservation goes back whole
        assert_eq!(released_reservation(300, &balances(500, 200, 0), 0), 300);
        // Commission refunded while the transfer was in flight
        assert_eq!(released_reservation(300, &balances(0, 0, 0), 0), 0);
        assert_eq!(released_reservation(300, &balances(100, 0, 0), 0), 100);
        // Another payout still holds part of the balance
        assert_eq!(released_reservation(300, &balances(400, 0, 0), 300), 100);
    }

    #[test]
    fn test_mask_iban() {
        assert_eq!(mask_iban("ES9121000418450200051332"), "****1332");
        assert_eq!(mask_iban("AB"), "****AB");
    }
}
