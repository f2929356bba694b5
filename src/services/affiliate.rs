// Affiliate profiles, click attribution and payout account onboarding

use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_config::AffiliateConfig;
use crate::models::affiliate::{
    AccountStatus, AffiliateProfile, AffiliateTier, ConnectAccountUpdate,
    ConnectOnboardingResponse, ConnectStatusResponse, NewAffiliateProfile, NewReferral, Payout,
    PayoutMethod, PayoutSettings, Referral, Sale, UpdatePayoutSettingsRequest,
};
use crate::services::stripe::{ConnectedAccount, PaymentProcessor};
use crate::stores::{AffiliateStore, ClickMarkerStore, StoreError};
use crate::utils::affiliate_code::{
    generate_code, normalize_code, normalize_iban, validate_iban, AffiliateCodeValidator,
};
use crate::utils::api_errors::ApiError;

const MAX_CODE_ATTEMPTS: usize = 5;

/// Everything known about a click when it reaches the server
#[derive(Debug, Clone, Default)]
pub struct ClickContext {
    pub affiliate_code: String,
    pub referrer_url: Option<String>,
    pub landing_page: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickOutcome {
    pub referral_id: Uuid,
    pub affiliate_code: String,
    pub duplicate: bool,
}

pub struct AffiliateService {
    store: Arc<dyn AffiliateStore>,
    markers: Arc<dyn ClickMarkerStore>,
    processor: Arc<dyn PaymentProcessor>,
    config: AffiliateConfig,
}

impl AffiliateService {
    pub fn new(
        store: Arc<dyn AffiliateStore>,
        markers: Arc<dyn ClickMarkerStore>,
        processor: Arc<dyn PaymentProcessor>,
        config: AffiliateConfig,
    ) -> Self {
        Self {
            store,
            markers,
            processor,
            config,
        }
    }

    // =========================================================================
    // CLICK ATTRIBUTION
    // =========================================================================

    /// Record a referral click for an active affiliate code
    pub async fn track_click(&self, click: ClickContext) -> Result<ClickOutcome, ApiError> {
        let code = normalize_code(&click.affiliate_code);
        if code.is_empty() {
            return Err(ApiError::ValidationError(
                "affiliateCode is required".to_string(),
            ));
        }

        let profile = match self.store.find_profile_by_code(&code).await? {
            Some(profile) if profile.is_active => profile,
            _ => {
                debug!(affiliate_code = %code, "Click for unknown or inactive affiliate code");
                return Err(ApiError::AffiliateNotFound);
            },
        };

        let marker_key = click_marker_key(&code, &click);

        // Marker failures never block recording the click
        match self.markers.get(&marker_key).await {
            Ok(Some(referral_id)) => {
                debug!(affiliate_code = %code, referral_id = %referral_id, "Duplicate click suppressed");
                return Ok(ClickOutcome {
                    referral_id,
                    affiliate_code: code,
                    duplicate: true,
                });
            },
            Ok(None) => {},
            Err(e) => warn!("Click marker lookup failed, recording click: {}", e),
        }

        let referral = self
            .store
            .record_click(NewReferral {
                affiliate_id: profile.id,
                affiliate_code: code.clone(),
                ip_address: click.ip_address,
                user_agent: click.user_agent,
                referrer_url: click.referrer_url,
                landing_page: click.landing_page,
            })
            .await?;

        if let Err(e) = self
            .markers
            .put(&marker_key, referral.id, self.config.click_dedupe_ttl_seconds)
            .await
        {
            warn!("Failed to store click marker: {}", e);
        }

        info!(affiliate_code = %code, referral_id = %referral.id, "Affiliate click recorded");

        Ok(ClickOutcome {
            referral_id: referral.id,
            affiliate_code: code,
            duplicate: false,
        })
    }

    // =========================================================================
    // PROFILES
    // =========================================================================

    /// Register the user as an affiliate with a custom or generated code
    pub async fn create_profile(
        &self,
        user_id: Uuid,
        requested_code: Option<String>,
    ) -> Result<AffiliateProfile, ApiError> {
        if self.store.find_profile_by_user(user_id).await?.is_some() {
            return Err(ApiError::Conflict(
                "User is already registered as an affiliate".to_string(),
            ));
        }

        let custom_code = requested_code
            .map(|c| normalize_code(&c))
            .filter(|c| !c.is_empty());

        if let Some(code) = custom_code {
            AffiliateCodeValidator::validate(&code).map_err(ApiError::ValidationError)?;
            return match self.insert_profile(user_id, code.clone()).await {
                Err(StoreError::Conflict(constraint)) => Err(profile_conflict(&constraint, &code)),
                other => Ok(other?),
            };
        }

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = generate_code();
            match self.insert_profile(user_id, code.clone()).await {
                Ok(profile) => return Ok(profile),
                Err(StoreError::Conflict(constraint)) if !is_user_conflict(&constraint) => {
                    debug!(attempt, "Generated affiliate code collided, retrying");
                },
                Err(StoreError::Conflict(constraint)) => {
                    return Err(profile_conflict(&constraint, &code))
                },
                Err(e) => return Err(e.into()),
            }
        }

        warn!(user_id = %user_id, "Could not generate a unique affiliate code");
        Err(ApiError::ServiceUnavailable(
            "could not allocate an affiliate code".to_string(),
        ))
    }

    async fn insert_profile(
        &self,
        user_id: Uuid,
        code: String,
    ) -> Result<AffiliateProfile, StoreError> {
        let profile = self
            .store
            .create_profile(NewAffiliateProfile {
                user_id,
                affiliate_code: code,
                tier: AffiliateTier::Standard.as_str().to_string(),
                payout_method: PayoutMethod::Stripe.as_str().to_string(),
            })
            .await?;

        info!(user_id = %user_id, affiliate_code = %profile.affiliate_code, "Affiliate registered");
        Ok(profile)
    }

    pub async fn profile_for_user(&self, user_id: Uuid) -> Result<AffiliateProfile, ApiError> {
        self.store
            .find_profile_by_user(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Affiliate profile".to_string()))
    }

    pub async fn update_payout_settings(
        &self,
        user_id: Uuid,
        request: UpdatePayoutSettingsRequest,
    ) -> Result<AffiliateProfile, ApiError> {
        let profile = self.profile_for_user(user_id).await?;
        let method: PayoutMethod = request
            .payout_method
            .parse()
            .map_err(ApiError::ValidationError)?;

        let payout_email = request
            .payout_email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty());
        let bank_account_holder = request
            .bank_account_holder
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty());
        let bank_iban = request
            .bank_iban
            .map(|iban| normalize_iban(&iban))
            .filter(|iban| !iban.is_empty());

        if method == PayoutMethod::BankTransfer
            && (bank_account_holder.is_none() || bank_iban.is_none())
        {
            return Err(ApiError::ValidationError(
                "bankAccountHolder and bankIban are required for bank_transfer".to_string(),
            ));
        }
        if let Some(iban) = bank_iban.as_deref() {
            validate_iban(iban).map_err(ApiError::ValidationError)?;
        }

        let settings = PayoutSettings {
            payout_method: method.as_str().to_string(),
            payout_email,
            bank_account_holder,
            bank_iban,
        };

        Ok(self.store.update_payout_settings(profile.id, settings).await?)
    }

    // =========================================================================
    // CONNECTED PAYOUT ACCOUNT
    // =========================================================================

    /// Create the connected account if needed and hand back a hosted onboarding link
    pub async fn start_connect_onboarding(
        &self,
        user_id: Uuid,
        email: Option<&str>,
    ) -> Result<ConnectOnboardingResponse, ApiError> {
        let profile = self.profile_for_user(user_id).await?;

        let account_id = match profile.stripe_account_id.clone() {
            Some(account_id) => account_id,
            None => {
                let contact = profile.payout_email.as_deref().or(email);
                let account = self.processor.create_connected_account(contact).await?;
                self.store
                    .update_connect_account(
                        profile.id,
                        ConnectAccountUpdate {
                            stripe_account_id: Some(account.id.clone()),
                            stripe_onboarding_complete: false,
                            stripe_account_status: AccountStatus::Pending.as_str().to_string(),
                        },
                    )
                    .await?;
                info!(affiliate_id = %profile.id, account_id = %account.id, "Connected account created");
                account.id
            },
        };

        let onboarding_url = self.processor.create_onboarding_link(&account_id).await?;

        Ok(ConnectOnboardingResponse {
            account_id,
            onboarding_url,
        })
    }

    /// Pull the account state from the processor and persist it
    pub async fn refresh_connect_status(
        &self,
        user_id: Uuid,
    ) -> Result<ConnectStatusResponse, ApiError> {
        let profile = self.profile_for_user(user_id).await?;

        let Some(account_id) = profile.stripe_account_id.clone() else {
            return Ok(ConnectStatusResponse {
                account_id: None,
                status: AccountStatus::NotConnected,
                onboarding_complete: false,
                payouts_enabled: false,
            });
        };

        let account = self.processor.retrieve_account(&account_id).await?;
        self.apply_account_state(&profile, &account).await?;

        Ok(ConnectStatusResponse {
            account_id: Some(account_id),
            status: account.status(),
            onboarding_complete: account.details_submitted,
            payouts_enabled: account.can_receive_payouts(),
        })
    }

    /// Mirror an `account.updated` notification onto the owning profile
    pub async fn sync_connected_account(
        &self,
        account: &ConnectedAccount,
    ) -> Result<Option<AffiliateProfile>, ApiError> {
        match self.store.find_profile_by_stripe_account(&account.id).await? {
            Some(profile) => Ok(Some(self.apply_account_state(&profile, account).await?)),
            None => {
                debug!(account_id = %account.id, "account.updated for unknown connected account");
                Ok(None)
            },
        }
    }

    async fn apply_account_state(
        &self,
        profile: &AffiliateProfile,
        account: &ConnectedAccount,
    ) -> Result<AffiliateProfile, StoreError> {
        self.store
            .update_connect_account(
                profile.id,
                ConnectAccountUpdate {
                    stripe_account_id: Some(account.id.clone()),
                    stripe_onboarding_complete: account.details_submitted,
                    stripe_account_status: account.status().as_str().to_string(),
                },
            )
            .await
    }

    // =========================================================================
    // HISTORY
    // =========================================================================

    pub async fn list_referrals(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Referral>, ApiError> {
        let profile = self.profile_for_user(user_id).await?;
        Ok(self.store.list_referrals(profile.id, limit).await?)
    }

    pub async fn list_sales(&self, user_id: Uuid, limit: i64) -> Result<Vec<Sale>, ApiError> {
        let profile = self.profile_for_user(user_id).await?;
        Ok(self.store.list_sales(profile.id, limit).await?)
    }

    pub async fn list_payouts(&self, user_id: Uuid, limit: i64) -> Result<Vec<Payout>, ApiError> {
        let profile = self.profile_for_user(user_id).await?;
        Ok(self.store.list_payouts(profile.id, limit).await?)
    }
}

/// Profile rows are unique per user and per code. Postgres names the
/// violated constraint, the memory store mirrors those names.
fn is_user_conflict(constraint: &str) -> bool {
    constraint.contains("user_id")
}

fn profile_conflict(constraint: &str, code: &str) -> ApiError {
    if is_user_conflict(constraint) {
        ApiError::Conflict("User is already registered as an affiliate".to_string())
    } else {
        ApiError::Conflict(format!("Affiliate code {} is already taken", code))
    }
}

/// Stable key for one landing visit of one visitor through one code
fn click_marker_key(code: &str, click: &ClickContext) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hasher.update(b"|");
    hasher.update(click.ip_address.as_deref().unwrap_or("-").as_bytes());
    hasher.update(b"|");
    hasher.update(click.landing_page.as_deref().unwrap_or("-").as_bytes());
    hex::encode(hasher.finalize())
}
