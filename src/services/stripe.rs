// Stripe REST client for Connect accounts and transfers

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::app_config::StripeConfig;
use crate::models::affiliate::AccountStatus;

// =============================================================================
// ERROR TYPES
// =============================================================================

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Payment processor unreachable: {0}")]
    Network(String),

    #[error("{message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Unexpected payment processor response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ProcessorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProcessorError::InvalidResponse(err.to_string())
        } else {
            ProcessorError::Network(err.to_string())
        }
    }
}

// =============================================================================
// DATA STRUCTURES
// =============================================================================

/// Capability states reported on a connected account
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountCapabilities {
    pub transfers: Option<String>,
}

/// Connected (Express) account as reported by Stripe
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectedAccount {
    pub id: String,
    #[serde(default)]
    pub details_submitted: bool,
    #[serde(default)]
    pub charges_enabled: bool,
    #[serde(default)]
    pub payouts_enabled: bool,
    #[serde(default)]
    pub capabilities: AccountCapabilities,
}

impl ConnectedAccount {
    pub fn transfers_active(&self) -> bool {
        self.capabilities.transfers.as_deref() == Some("active")
    }

    /// Money can actually be moved to this account right now
    pub fn can_receive_payouts(&self) -> bool {
        self.payouts_enabled && self.transfers_active()
    }

    pub fn status(&self) -> AccountStatus {
        if self.can_receive_payouts() && self.details_submitted {
            AccountStatus::Active
        } else if self.details_submitted {
            AccountStatus::Restricted
        } else {
            AccountStatus::Pending
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub destination: String,
    pub idempotency_key: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub destination: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountLink {
    url: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    message: Option<String>,
    code: Option<String>,
}

// =============================================================================
// PROCESSOR TRAIT
// =============================================================================

/// Operations the affiliate pipeline needs from the payment processor
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_connected_account(
        &self,
        email: Option<&str>,
    ) -> Result<ConnectedAccount, ProcessorError>;

    async fn create_onboarding_link(&self, account_id: &str) -> Result<String, ProcessorError>;

    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, ProcessorError>;

    async fn create_transfer(&self, transfer: &TransferRequest) -> Result<Transfer, ProcessorError>;
}

// =============================================================================
// STRIPE CLIENT
// =============================================================================

pub struct StripeClient {
    http_client: reqwest::Client,
    secret_key: String,
    api_base: String,
    connect_country: String,
    return_url: String,
    refresh_url: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Result<Self, ProcessorError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent("Chefly-Backend/1.0")
            .build()?;

        Ok(Self {
            http_client,
            secret_key: config.secret_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            connect_country: config.connect_country.clone(),
            return_url: config.connect_return_url.clone(),
            refresh_url: config.connect_refresh_url.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_base, path)
    }

    /// Decode a Stripe response, turning error envelopes into `ProcessorError::Api`
    async fn decode<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, ProcessorError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let (message, code) = match serde_json::from_str::<StripeErrorEnvelope>(&body) {
            Ok(envelope) => (
                envelope
                    .error
                    .message
                    .unwrap_or_else(|| format!("Stripe returned HTTP {}", status.as_u16())),
                envelope.error.code,
            ),
            Err(_) => (format!("Stripe returned HTTP {}", status.as_u16()), None),
        };

        warn!(status = status.as_u16(), code = ?code, "Stripe request rejected: {}", message);

        Err(ProcessorError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn create_connected_account(
        &self,
        email: Option<&str>,
    ) -> Result<ConnectedAccount, ProcessorError> {
        let mut form: Vec<(&str, String)> = vec![
            ("type", "express".to_string()),
            ("country", self.connect_country.clone()),
            ("capabilities[transfers][requested]", "true".to_string()),
        ];
        if let Some(email) = email {
            form.push(("email", email.to_string()));
        }

        let response = self
            .http_client
            .post(self.url("accounts"))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await?;

        let account: ConnectedAccount = Self::decode(response).await?;
        debug!(account_id = %account.id, "Created Stripe connected account");
        Ok(account)
    }

    async fn create_onboarding_link(&self, account_id: &str) -> Result<String, ProcessorError> {
        let form = [
            ("account", account_id),
            ("refresh_url", self.refresh_url.as_str()),
            ("return_url", self.return_url.as_str()),
            ("type", "account_onboarding"),
        ];

        let response = self
            .http_client
            .post(self.url("account_links"))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await?;

        let link: AccountLink = Self::decode(response).await?;
        Ok(link.url)
    }

    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, ProcessorError> {
        let response = self
            .http_client
            .get(self.url(&format!("accounts/{}", account_id)))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        Self::decode(response).await
    }

    async fn create_transfer(&self, transfer: &TransferRequest) -> Result<Transfer, ProcessorError> {
        let mut form: Vec<(String, String)> = vec![
            ("amount".to_string(), transfer.amount_cents.to_string()),
            ("currency".to_string(), transfer.currency.clone()),
            ("destination".to_string(), transfer.destination.clone()),
        ];
        for (key, value) in &transfer.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }

        // The key makes a retried request return the original transfer
        let response = self
            .http_client
            .post(self.url("transfers"))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &transfer.idempotency_key)
            .form(&form)
            .send()
            .await?;

        let created: Transfer = Self::decode(response).await?;
        debug!(transfer_id = %created.id, amount = created.amount, "Created Stripe transfer");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(json: serde_json::Value) -> ConnectedAccount {
        serde_json::from_value(json).expect("valid account json")
    }

    #[test]
    fn test_account_status_active() {
        let acct = account(serde_json::json!({
            "id": "acct_1",
            "details_submitted": true,
            "payouts_enabled": true,
            "charges_enabled": true,
            "capabilities": { "transfers": "active" }
        }));
        assert!(acct.can_receive_payouts());
        assert_eq!(acct.status(), AccountStatus::Active);
    }

    #[test]
    fn test_account_status_restricted_without_transfers() {
        let acct = account(serde_json::json!({
            "id": "acct_2",
            "details_submitted": true,
            "payouts_enabled": true,
            "capabilities": { "transfers": "inactive" }
        }));
        assert!(!acct.can_receive_payouts());
        assert_eq!(acct.status(), AccountStatus::Restricted);
    }

    #[test]
    fn test_account_status_pending_defaults() {
        let acct = account(serde_json::json!({ "id": "acct_3" }));
        assert_eq!(acct.status(), AccountStatus::Pending);
    }

    #[test]
    fn test_processor_api_error_displays_message() {
        let err = ProcessorError::Api {
            status: 400,
            code: Some("balance_insufficient".to_string()),
            message: "Insufficient funds in Stripe account".to_string(),
        };
        assert_eq!(err.to_string(), "Insufficient funds in Stripe account");
    }
}
