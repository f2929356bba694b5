// Affiliate payout disbursement through Stripe Connect transfers

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app_config::AffiliateConfig;
use crate::models::affiliate::{NewPayout, Payout, PayoutMethod, PayoutStatus};
use crate::services::stripe::{PaymentProcessor, TransferRequest};
use crate::stores::{AffiliateStore, StoreError};
use crate::utils::api_errors::ApiError;

#[derive(Debug, Clone)]
pub struct CompletedPayout {
    pub payout: Payout,
    pub transfer_id: String,
}

pub struct PayoutService {
    store: Arc<dyn AffiliateStore>,
    processor: Arc<dyn PaymentProcessor>,
    config: AffiliateConfig,
}

impl PayoutService {
    pub fn new(
        store: Arc<dyn AffiliateStore>,
        processor: Arc<dyn PaymentProcessor>,
        config: AffiliateConfig,
    ) -> Self {
        Self {
            store,
            processor,
            config,
        }
    }

    /// Transfer `amount_cents` of the affiliate's pending balance to their
    /// connected account
    pub async fn request_payout(
        &self,
        user_id: Uuid,
        amount_cents: i64,
        payout_method: Option<&str>,
    ) -> Result<CompletedPayout, ApiError> {
        if amount_cents < self.config.min_payout_cents {
            return Err(ApiError::BelowMinimumPayout {
                minimum_cents: self.config.min_payout_cents,
            });
        }

        let profile = self
            .store
            .find_profile_by_user(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Affiliate profile".to_string()))?;

        if amount_cents > profile.pending_balance_cents {
            return Err(ApiError::InsufficientBalance {
                requested_cents: amount_cents,
                available_cents: profile.pending_balance_cents,
            });
        }

        let method = match payout_method {
            Some(m) => m.parse::<PayoutMethod>().map_err(ApiError::ValidationError)?,
            None => PayoutMethod::Stripe,
        };
        if method != PayoutMethod::Stripe {
            return Err(ApiError::ValidationError(
                "Only stripe payouts can be requested automatically".to_string(),
            ));
        }

        let account_id = match profile.stripe_account_id.as_deref() {
            Some(account_id) if profile.payout_account_ready() => account_id.to_string(),
            _ => {
                return Err(ApiError::PayoutAccountNotReady(
                    "complete Stripe onboarding before requesting a payout".to_string(),
                ))
            },
        };

        // Cached flags can lag behind the processor
        let account = self.processor.retrieve_account(&account_id).await?;
        if !account.can_receive_payouts() {
            warn!(
                affiliate_id = %profile.id,
                account_id = %account_id,
                "Connected account cannot receive payouts"
            );
            return Err(ApiError::PayoutAccountNotReady(
                "payouts are not enabled on the connected account".to_string(),
            ));
        }

        let payout = match self
            .store
            .reserve_payout(NewPayout {
                affiliate_id: profile.id,
                amount_cents,
                currency: self.config.currency.clone(),
                payout_method: method.as_str().to_string(),
                status: PayoutStatus::Processing.as_str().to_string(),
            })
            .await
        {
            Ok(payout) => payout,
            Err(StoreError::InsufficientBalance) => {
                let available = self
                    .store
                    .find_profile_by_id(profile.id)
                    .await?
                    .map(|p| p.pending_balance_cents)
                    .unwrap_or(0);
                return Err(ApiError::InsufficientBalance {
                    requested_cents: amount_cents,
                    available_cents: available,
                });
            },
            Err(e) => return Err(e.into()),
        };

        let mut metadata = HashMap::new();
        metadata.insert("payout_id".to_string(), payout.id.to_string());
        metadata.insert("affiliate_id".to_string(), profile.id.to_string());
        metadata.insert("affiliate_code".to_string(), profile.affiliate_code.clone());

        let transfer = TransferRequest {
            amount_cents,
            currency: payout.currency.clone(),
            destination: account_id,
            idempotency_key: format!("payout-{}", payout.id),
            metadata,
        };

        let created = match self.processor.create_transfer(&transfer).await {
            Ok(created) => created,
            Err(e) => {
                let reason = e.to_string();
                warn!(payout_id = %payout.id, "Transfer failed: {}", reason);
                if let Err(release_err) = self.store.fail_payout(payout.id, &reason).await {
                    error!(
                        payout_id = %payout.id,
                        "Failed to release reserved payout amount: {}", release_err
                    );
                }
                return Err(e.into());
            },
        };

        let payout = self
            .store
            .complete_payout(payout.id, &created.id)
            .await
            .map_err(|e| {
                // The transfer exists; the processing row keeps the reservation
                // until it is reconciled against the transfer metadata
                error!(
                    payout_id = %payout.id,
                    transfer_id = %created.id,
                    "Transfer succeeded but payout could not be completed: {}", e
                );
                ApiError::from(e)
            })?;

        info!(
            affiliate_id = %profile.id,
            payout_id = %payout.id,
            transfer_id = %created.id,
            amount_cents,
            "Affiliate payout completed"
        );

        Ok(CompletedPayout {
            payout,
            transfer_id: created.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::affiliate::{AffiliateProfile, ConnectAccountUpdate, NewAffiliateProfile};
    use crate::services::FakeProcessor;
    use crate::stores::MemoryAffiliateStore;

    struct Fixture {
        store: Arc<MemoryAffiliateStore>,
        processor: Arc<FakeProcessor>,
        service: PayoutService,
        profile: AffiliateProfile,
    }

    async fn fixture(pending: i64, onboarded: bool) -> Fixture {
        let store = Arc::new(MemoryAffiliateStore::new());
        let processor = Arc::new(FakeProcessor::new());
        let profile = store
            .create_profile(NewAffiliateProfile {
                user_id: Uuid::new_v4(),
                affiliate_code: "CHEF".to_string(),
                tier: "standard".to_string(),
                payout_method: "stripe".to_string(),
            })
            .await
            .unwrap();
        store.set_balances(profile.id, pending, pending, 0).await;

        if onboarded {
            store
                .update_connect_account(
                    profile.id,
                    ConnectAccountUpdate {
                        stripe_account_id: Some("acct_ready".to_string()),
                        stripe_onboarding_complete: true,
                        stripe_account_status: "active".to_string(),
                    },
                )
                .await
                .unwrap();
            processor.add_ready_account("acct_ready");
        }

        let service = PayoutService::new(store.clone(), processor.clone(), AffiliateConfig::default());
        let profile = store.find_profile_by_id(profile.id).await.unwrap().unwrap();
        Fixture {
            store,
            processor,
            service,
            profile,
        }
    }

    async fn balances(fx: &Fixture) -> (i64, i64) {
        let p = fx.store.find_profile_by_id(fx.profile.id).await.unwrap().unwrap();
        (p.pending_balance_cents, p.total_paid_cents)
    }

    #[tokio::test]
    async fn test_below_minimum_rejected() {
        let fx = fixture(1000, true).await;
        let result = fx.service.request_payout(fx.profile.user_id, 199, None).await;
        assert!(matches!(
            result,
            Err(ApiError::BelowMinimumPayout { minimum_cents: 200 })
        ));
    }

    #[tokio::test]
    async fn test_above_balance_rejected() {
        let fx = fixture(300, true).await;
        let result = fx.service.request_payout(fx.profile.user_id, 500, None).await;
        assert!(matches!(
            result,
            Err(ApiError::InsufficientBalance {
                requested_cents: 500,
                available_cents: 300
            })
        ));
        assert!(fx.processor.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_exact_boundary_accepted() {
        let fx = fixture(200, true).await;
        let completed = fx
            .service
            .request_payout(fx.profile.user_id, 200, Some("stripe"))
            .await
            .unwrap();

        assert_eq!(completed.payout.status, "completed");
        assert_eq!(completed.payout.amount_cents, 200);
        assert_eq!(
            completed.payout.external_transfer_id.as_deref(),
            Some(completed.transfer_id.as_str())
        );
        assert_eq!(balances(&fx).await, (0, 200));

        let transfers = fx.processor.transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].destination, "acct_ready");
        assert_eq!(
            transfers[0].idempotency_key,
            format!("payout-{}", completed.payout.id)
        );
    }

    #[tokio::test]
    async fn test_requires_onboarded_account() {
        let fx = fixture(1000, false).await;
        let result = fx.service.request_payout(fx.profile.user_id, 500, None).await;
        assert!(matches!(result, Err(ApiError::PayoutAccountNotReady(_))));
    }

    #[tokio::test]
    async fn test_processor_state_is_rechecked() {
        let fx = fixture(1000, true).await;
        fx.processor.set_account("acct_ready", false);

        let result = fx.service.request_payout(fx.profile.user_id, 500, None).await;
        assert!(matches!(result, Err(ApiError::PayoutAccountNotReady(_))));
        assert_eq!(balances(&fx).await, (1000, 0));
    }

    #[tokio::test]
    async fn test_failed_transfer_releases_reservation() {
        let fx = fixture(1000, true).await;
        fx.processor.fail_transfers_with("Insufficient funds in Stripe account");

        let result = fx.service.request_payout(fx.profile.user_id, 500, None).await;
        match result {
            Err(ApiError::PaymentProcessor(msg)) => {
                assert!(msg.contains("Insufficient funds"))
            },
            other => panic!("unexpected result: {:?}", other.map(|p| p.transfer_id)),
        }

        assert_eq!(balances(&fx).await, (1000, 0));
        let payouts = fx.store.list_payouts(fx.profile.id, 10).await.unwrap();
        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].status, "failed");
    }

    #[tokio::test]
    async fn test_missing_profile() {
        let fx = fixture(1000, true).await;
        let result = fx.service.request_payout(Uuid::new_v4(), 500, None).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }
}
