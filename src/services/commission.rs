// Sale commissions: attribution, crediting, refunds and approval

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_config::AffiliateConfig;
use crate::models::affiliate::{
    AffiliateProfile, AffiliateTier, NewSale, Sale, SaleRecording, SaleStatus,
};
use crate::stores::{AffiliateStore, StoreError};
use crate::utils::affiliate_code::normalize_code;

/// Commission for a sale at a tier's rate, in basis points and cents.
/// Fractions of a cent are dropped.
pub fn compute_commission(sale_amount_cents: i64, tier: AffiliateTier) -> (i32, i64) {
    let rate_bps = tier.commission_rate_bps();
    let commission = sale_amount_cents.max(0) * i64::from(rate_bps) / 10_000;
    (rate_bps, commission)
}

/// A completed purchase as reported by the payment webhook
#[derive(Debug, Clone, Default)]
pub struct CompletedSale {
    pub external_payment_id: String,
    pub payment_intent_id: Option<String>,
    pub customer_email: Option<String>,
    pub customer_id: Option<String>,
    pub product_id: Option<String>,
    pub price_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub affiliate_code: Option<String>,
    pub referral_id: Option<Uuid>,
}

impl CompletedSale {
    pub fn is_attributed(&self) -> bool {
        self.affiliate_code.as_deref().is_some_and(|c| !c.trim().is_empty())
            || self.referral_id.is_some()
    }
}

pub struct CommissionService {
    store: Arc<dyn AffiliateStore>,
    config: AffiliateConfig,
}

impl CommissionService {
    pub fn new(store: Arc<dyn AffiliateStore>, config: AffiliateConfig) -> Self {
        Self { store, config }
    }

    /// Credit the attributed affiliate with a pending commission.
    /// Returns `None` when the sale cannot be attributed to an active affiliate.
    pub async fn process_sale(
        &self,
        sale: &CompletedSale,
    ) -> Result<Option<SaleRecording>, StoreError> {
        let Some((profile, referral_id)) = self.resolve_attribution(sale).await? else {
            debug!(
                external_payment_id = %sale.external_payment_id,
                "Sale has no active affiliate attribution"
            );
            return Ok(None);
        };

        let (rate_bps, commission_cents) = compute_commission(sale.amount_cents, profile.tier());
        let currency = if sale.currency.is_empty() {
            self.config.currency.clone()
        } else {
            sale.currency.to_lowercase()
        };

        let recording = self
            .store
            .record_sale(NewSale {
                affiliate_id: profile.id,
                referral_id,
                customer_email: sale.customer_email.clone(),
                customer_id: sale.customer_id.clone(),
                external_payment_id: sale.external_payment_id.clone(),
                payment_intent_id: sale.payment_intent_id.clone(),
                product_id: sale.product_id.clone(),
                price_id: sale.price_id.clone(),
                sale_amount_cents: sale.amount_cents,
                commission_rate_bps: rate_bps,
                commission_cents,
                currency,
                status: SaleStatus::Pending.as_str().to_string(),
            })
            .await?;

        match &recording {
            SaleRecording::Created(row) => info!(
                affiliate_id = %profile.id,
                sale_id = %row.id,
                commission_cents,
                "Affiliate commission credited"
            ),
            SaleRecording::AlreadyRecorded(row) => debug!(
                sale_id = %row.id,
                "Sale already recorded, skipping credit"
            ),
        }

        Ok(Some(recording))
    }

    /// Explicit code wins over a referral id
    async fn resolve_attribution(
        &self,
        sale: &CompletedSale,
    ) -> Result<Option<(AffiliateProfile, Option<Uuid>)>, StoreError> {
        if let Some(code) = sale.affiliate_code.as_deref().map(normalize_code) {
            if !code.is_empty() {
                let Some(profile) = self
                    .store
                    .find_profile_by_code(&code)
                    .await?
                    .filter(|p| p.is_active)
                else {
                    return Ok(None);
                };
                let referral_id = self.owned_referral(sale.referral_id, profile.id).await?;
                return Ok(Some((profile, referral_id)));
            }
        }

        let Some(referral_id) = sale.referral_id else {
            return Ok(None);
        };
        let Some(referral) = self.store.find_referral(referral_id).await? else {
            warn!(referral_id = %referral_id, "Sale references an unknown referral");
            return Ok(None);
        };

        Ok(self
            .store
            .find_profile_by_id(referral.affiliate_id)
            .await?
            .filter(|p| p.is_active)
            .map(|p| (p, Some(referral_id))))
    }

    /// Keep a referral id only if that click belongs to the attributed affiliate.
    /// `client_reference_id` often carries the buyer's own id instead.
    async fn owned_referral(
        &self,
        referral_id: Option<Uuid>,
        affiliate_id: Uuid,
    ) -> Result<Option<Uuid>, StoreError> {
        let Some(referral_id) = referral_id else {
            return Ok(None);
        };
        match self.store.find_referral(referral_id).await? {
            Some(referral) if referral.affiliate_id == affiliate_id => Ok(Some(referral_id)),
            _ => {
                debug!(referral_id = %referral_id, "Dropping referral id not owned by the coded affiliate");
                Ok(None)
            },
        }
    }

    /// Reverse the commission of a refunded sale
    pub async fn reject_refunded_sale(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Sale>, StoreError> {
        let rejected = self
            .store
            .reject_sale_by_payment_intent(payment_intent_id)
            .await?;

        if let Some(sale) = &rejected {
            info!(
                sale_id = %sale.id,
                commission_cents = sale.commission_cents,
                "Refunded sale rejected"
            );
        }
        Ok(rejected)
    }

    /// Approve pending sales that are past the refund hold
    pub async fn approve_matured_sales(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = now - Duration::days(self.config.approval_hold_days);
        let approved = self.store.approve_sales_created_before(cutoff).await?;
        if approved > 0 {
            info!(approved, "Approved matured affiliate sales");
        }
        Ok(approved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::affiliate::{NewAffiliateProfile, NewReferral};
    use crate::stores::MemoryAffiliateStore;

    #[test]
    fn test_commission_rates_round_down() {
        assert_eq!(compute_commission(999, AffiliateTier::Standard), (2000, 199));
        assert_eq!(compute_commission(999, AffiliateTier::Silver), (2500, 249));
        assert_eq!(compute_commission(999, AffiliateTier::Gold), (3000, 299));
        assert_eq!(compute_commission(-5, AffiliateTier::Gold), (3000, 0));
    }

    async fn setup() -> (Arc<MemoryAffiliateStore>, CommissionService, AffiliateProfile) {
        let store = Arc::new(MemoryAffiliateStore::new());
        let profile = store
            .create_profile(NewAffiliateProfile {
                user_id: Uuid::new_v4(),
                affiliate_code: "CHEF".to_string(),
                tier: "standard".to_string(),
                payout_method: "stripe".to_string(),
            })
            .await
            .unwrap();
        let service = CommissionService::new(store.clone(), AffiliateConfig::default());
        (store, service, profile)
    }

    fn sale(id: &str, code: Option<&str>) -> CompletedSale {
        CompletedSale {
            external_payment_id: id.to_string(),
            payment_intent_id: Some(format!("pi_{}", id)),
            amount_cents: 1000,
            currency: "EUR".to_string(),
            affiliate_code: code.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_redelivered_sale_credits_once() {
        let (store, service, profile) = setup().await;

        let first = service.process_sale(&sale("cs_1", Some("chef"))).await.unwrap();
        let again = service.process_sale(&sale("cs_1", Some("chef"))).await.unwrap();

        assert!(matches!(first, Some(SaleRecording::Created(_))));
        assert!(matches!(again, Some(SaleRecording::AlreadyRecorded(_))));

        let profile = store.find_profile_by_id(profile.id).await.unwrap().unwrap();
        assert_eq!(profile.total_earned_cents, 200);
        assert_eq!(profile.pending_balance_cents, 200);
        assert_eq!(profile.total_conversions, 1);
    }

    #[tokio::test]
    async fn test_attribution_by_referral_id() {
        let (store, service, profile) = setup().await;
        store.set_tier(profile.id, "gold").await;
        let referral = store
            .record_click(NewReferral {
                affiliate_id: profile.id,
                affiliate_code: "CHEF".to_string(),
                ip_address: None,
                user_agent: None,
                referrer_url: None,
                landing_page: None,
            })
            .await
            .unwrap();

        let mut completed = sale("cs_2", None);
        completed.referral_id = Some(referral.id);
        let recorded = service.process_sale(&completed).await.unwrap().unwrap();

        assert_eq!(recorded.sale().referral_id, Some(referral.id));
        assert_eq!(recorded.sale().commission_cents, 300);
        assert_eq!(recorded.sale().currency, "eur");
    }

    #[tokio::test]
    async fn test_code_sale_drops_unknown_referral_id() {
        let (store, service, profile) = setup().await;

        // Checkout put the buyer's own id in client_reference_id
        let mut completed = sale("cs_9", Some("CHEF"));
        completed.referral_id = Some(Uuid::new_v4());
        let recorded = service.process_sale(&completed).await.unwrap().unwrap();

        assert!(matches!(recorded, SaleRecording::Created(_)));
        assert_eq!(recorded.sale().referral_id, None);
        let profile = store.find_profile_by_id(profile.id).await.unwrap().unwrap();
        assert_eq!(profile.pending_balance_cents, 200);
    }

    #[tokio::test]
    async fn test_code_sale_drops_other_affiliates_referral() {
        let (store, service, profile) = setup().await;
        let other = store
            .create_profile(NewAffiliateProfile {
                user_id: Uuid::new_v4(),
                affiliate_code: "OTHER".to_string(),
                tier: "standard".to_string(),
                payout_method: "stripe".to_string(),
            })
            .await
            .unwrap();
        let foreign_click = store
            .record_click(NewReferral {
                affiliate_id: other.id,
                affiliate_code: "OTHER".to_string(),
                ip_address: None,
                user_agent: None,
                referrer_url: None,
                landing_page: None,
            })
            .await
            .unwrap();

        let mut completed = sale("cs_10", Some("CHEF"));
        completed.referral_id = Some(foreign_click.id);
        let recorded = service.process_sale(&completed).await.unwrap().unwrap();

        assert_eq!(recorded.sale().affiliate_id, profile.id);
        assert_eq!(recorded.sale().referral_id, None);
        let other = store.find_profile_by_id(other.id).await.unwrap().unwrap();
        assert_eq!(other.pending_balance_cents, 0);
    }

    #[tokio::test]
    async fn test_unattributed_or_inactive_sale_is_skipped() {
        let (store, service, profile) = setup().await;
        assert!(service.process_sale(&sale("cs_3", None)).await.unwrap().is_none());
        assert!(service
            .process_sale(&sale("cs_4", Some("UNKNOWN")))
            .await
            .unwrap()
            .is_none());

        store.set_active(profile.id, false).await;
        assert!(service
            .process_sale(&sale("cs_5", Some("CHEF")))
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.sale_count().await, 0);
    }

    #[tokio::test]
    async fn test_refund_reverses_credit() {
        let (store, service, profile) = setup().await;
        service.process_sale(&sale("cs_6", Some("CHEF"))).await.unwrap();

        let rejected = service.reject_refunded_sale("pi_cs_6").await.unwrap().unwrap();
        assert_eq!(rejected.status, "rejected");

        let profile = store.find_profile_by_id(profile.id).await.unwrap().unwrap();
        assert_eq!(profile.pending_balance_cents, 0);
        assert_eq!(profile.total_earned_cents, 0);

        assert!(service.reject_refunded_sale("pi_cs_6").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_approval_hold() {
        let (store, service, _profile) = setup().await;
        let old = service
            .process_sale(&sale("cs_7", Some("CHEF")))
            .await
            .unwrap()
            .unwrap();
        service.process_sale(&sale("cs_8", Some("CHEF"))).await.unwrap();

        let now = Utc::now();
        store.backdate_sale(old.sale().id, now - Duration::days(15)).await;

        assert_eq!(service.approve_matured_sales(now).await.unwrap(), 1);
        assert_eq!(service.approve_matured_sales(now).await.unwrap(), 0);
    }
}
