// Stripe webhook verification and event dispatch

use chrono::Utc;
use ring::hmac;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::payment::{NewPayment, PaymentProvider, PaymentStatus};
use crate::models::user::SubscriptionTier;
use crate::services::affiliate::AffiliateService;
use crate::services::commission::{CommissionService, CompletedSale};
use crate::services::stripe::ConnectedAccount;
use crate::stores::BillingStore;
use crate::utils::api_errors::ApiError;

// =============================================================================
// SIGNATURE VERIFICATION
// =============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing Stripe-Signature header")]
    MissingSignature,

    #[error("malformed Stripe-Signature header")]
    MalformedHeader,

    #[error("timestamp outside the tolerance window")]
    TimestampOutOfTolerance,

    #[error("no signature matches the payload")]
    SignatureMismatch,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),
}

/// Checks `Stripe-Signature: t=<unix>,v1=<hex hmac>` headers
pub struct WebhookVerifier {
    key: hmac::Key,
    tolerance_seconds: i64,
}

impl WebhookVerifier {
    pub fn new(secret: &str, tolerance_seconds: i64) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
            tolerance_seconds,
        }
    }

    pub fn verify(
        &self,
        payload: &[u8],
        header: Option<&str>,
        now_ts: i64,
    ) -> Result<(), WebhookError> {
        let header = header.ok_or(WebhookError::MissingSignature)?;

        let mut timestamp: Option<i64> = None;
        let mut signatures: Vec<Vec<u8>> = Vec::new();
        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => timestamp = value.parse().ok(),
                // Unknown schemes and undecodable values never match
                "v1" => {
                    if let Ok(bytes) = hex::decode(value) {
                        signatures.push(bytes);
                    }
                },
                _ => {},
            }
        }

        let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
        if signatures.is_empty() {
            return Err(WebhookError::MalformedHeader);
        }
        if (now_ts - timestamp).abs() > self.tolerance_seconds {
            return Err(WebhookError::TimestampOutOfTolerance);
        }

        let expected = self.sign(timestamp, payload);
        let matched = signatures
            .iter()
            .any(|candidate| bool::from(candidate.as_slice().ct_eq(expected.as_slice())));

        if matched {
            Ok(())
        } else {
            Err(WebhookError::SignatureMismatch)
        }
    }

    /// HMAC-SHA256 over `"{timestamp}.{payload}"`
    pub fn sign(&self, timestamp: i64, payload: &[u8]) -> Vec<u8> {
        let mut signed = Vec::with_capacity(payload.len() + 16);
        signed.extend_from_slice(timestamp.to_string().as_bytes());
        signed.push(b'.');
        signed.extend_from_slice(payload);
        hmac::sign(&self.key, &signed).as_ref().to_vec()
    }

    /// Header value for `payload`, as Stripe would send it
    pub fn header_for(&self, timestamp: i64, payload: &[u8]) -> String {
        format!("t={},v1={}", timestamp, hex::encode(self.sign(timestamp, payload)))
    }
}

// =============================================================================
// EVENT PAYLOADS
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

impl StripeEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, WebhookError> {
        serde_json::from_slice(payload).map_err(|e| WebhookError::InvalidPayload(e.to_string()))
    }

    fn object<T: for<'de> Deserialize<'de>>(&self) -> Result<T, WebhookError> {
        serde_json::from_value(self.data.object.clone()).map_err(|e| {
            WebhookError::InvalidPayload(format!("{} object: {}", self.event_type, e))
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct CustomerDetails {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckoutSession {
    id: String,
    customer: Option<String>,
    customer_email: Option<String>,
    #[serde(default)]
    customer_details: Option<CustomerDetails>,
    amount_total: Option<i64>,
    currency: Option<String>,
    client_reference_id: Option<String>,
    payment_intent: Option<String>,
    subscription: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl CheckoutSession {
    fn email(&self) -> Option<String> {
        self.customer_details
            .as_ref()
            .and_then(|d| d.email.clone())
            .or_else(|| self.customer_email.clone())
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
    }

    fn metadata(&self, key: &str) -> Option<String> {
        self.metadata
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn referral_id(&self) -> Option<Uuid> {
        self.metadata("referral_id")
            .or_else(|| self.client_reference_id.clone())
            .and_then(|id| Uuid::parse_str(id.trim()).ok())
    }
}

#[derive(Debug, Deserialize)]
struct Charge {
    id: String,
    payment_intent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Subscription {
    id: String,
    customer: Option<String>,
}

// =============================================================================
// DISPATCH
// =============================================================================

/// What an event caused, for logging and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    CheckoutCompleted {
        user_found: bool,
        commission_recorded: bool,
    },
    SaleRejected(bool),
    SubscriptionCancelled(bool),
    AccountSynced(bool),
    Ignored,
}

pub struct WebhookService {
    verifier: WebhookVerifier,
    billing: Arc<dyn BillingStore>,
    commissions: Arc<CommissionService>,
    affiliates: Arc<AffiliateService>,
}

impl WebhookService {
    pub fn new(
        verifier: WebhookVerifier,
        billing: Arc<dyn BillingStore>,
        commissions: Arc<CommissionService>,
        affiliates: Arc<AffiliateService>,
    ) -> Self {
        Self {
            verifier,
            billing,
            commissions,
            affiliates,
        }
    }

    /// Verify the signature, then apply the event. Nothing is touched when
    /// verification fails.
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, ApiError> {
        if let Err(e) = self
            .verifier
            .verify(payload, signature, Utc::now().timestamp())
        {
            warn!("Rejected Stripe webhook: {}", e);
            return Err(e.into());
        }

        let event = StripeEvent::parse(payload)?;
        debug!(event_id = %event.id, event_type = %event.event_type, "Stripe webhook received");

        match event.event_type.as_str() {
            "checkout.session.completed" => self.checkout_completed(&event).await,
            "charge.refunded" => {
                let charge: Charge = event.object()?;
                let Some(payment_intent) = charge.payment_intent.as_deref() else {
                    debug!(charge_id = %charge.id, "Refunded charge has no payment intent");
                    return Ok(WebhookOutcome::SaleRejected(false));
                };
                let rejected = self.commissions.reject_refunded_sale(payment_intent).await?;
                Ok(WebhookOutcome::SaleRejected(rejected.is_some()))
            },
            "customer.subscription.deleted" => {
                let subscription: Subscription = event.object()?;
                let Some(customer) = subscription.customer.as_deref() else {
                    return Ok(WebhookOutcome::SubscriptionCancelled(false));
                };
                let user = self.billing.cancel_subscription(customer).await?;
                if let Some(user) = &user {
                    info!(user_id = %user.id, subscription_id = %subscription.id, "Subscription cancelled");
                }
                Ok(WebhookOutcome::SubscriptionCancelled(user.is_some()))
            },
            "account.updated" => {
                let account: ConnectedAccount = event.object()?;
                let synced = self.affiliates.sync_connected_account(&account).await?;
                Ok(WebhookOutcome::AccountSynced(synced.is_some()))
            },
            other => {
                debug!(event_type = other, "Ignoring Stripe event");
                Ok(WebhookOutcome::Ignored)
            },
        }
    }

    async fn checkout_completed(&self, event: &StripeEvent) -> Result<WebhookOutcome, ApiError> {
        let session: CheckoutSession = event.object()?;
        let email = session.email();
        let amount = session.amount_total.unwrap_or(0);
        let currency = session
            .currency
            .clone()
            .unwrap_or_else(|| "eur".to_string())
            .to_lowercase();

        let user = match email.as_deref() {
            Some(email) => {
                self.billing
                    .mark_subscribed(email, session.customer.as_deref())
                    .await?
            },
            None => None,
        };

        match &user {
            Some(user) => {
                info!(user_id = %user.id, session_id = %session.id, "User subscribed");
                let recorded = self
                    .billing
                    .record_payment(NewPayment {
                        user_id: user.id,
                        provider: PaymentProvider::Stripe.as_str().to_string(),
                        provider_customer_id: session.customer.clone(),
                        provider_payment_id: Some(session.id.clone()),
                        provider_subscription_id: session.subscription.clone(),
                        amount,
                        currency: currency.clone(),
                        status: PaymentStatus::Completed.as_str().to_string(),
                        subscription_tier: SubscriptionTier::Premium.as_str().to_string(),
                        billing_period: session.metadata("billing_period"),
                        metadata: Some(serde_json::json!(session.metadata)),
                        completed_at: Some(Utc::now()),
                    })
                    .await?;
                if !recorded {
                    debug!(session_id = %session.id, "Payment already recorded");
                }
            },
            None => warn!(
                session_id = %session.id,
                "Checkout completed for an email with no matching user"
            ),
        }

        let sale = CompletedSale {
            external_payment_id: session.id.clone(),
            payment_intent_id: session.payment_intent.clone(),
            customer_email: email,
            customer_id: session.customer.clone(),
            product_id: session.metadata("product_id"),
            price_id: session.metadata("price_id"),
            amount_cents: amount,
            currency,
            affiliate_code: session.metadata("affiliate_code"),
            referral_id: session.referral_id(),
        };

        let commission_recorded = if sale.is_attributed() {
            self.commissions.process_sale(&sale).await?.is_some()
        } else {
            false
        };

        Ok(WebhookOutcome::CheckoutCompleted {
            user_found: user.is_some(),
            commission_recorded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    #[test]
    fn test_valid_signature() {
        let verifier = WebhookVerifier::new(SECRET, 300);
        let payload = br#"{"id":"evt_1"}"#;
        let header = verifier.header_for(1_700_000_000, payload);
        assert_eq!(verifier.verify(payload, Some(&header), 1_700_000_100), Ok(()));
    }

    #[test]
    fn test_any_v1_signature_may_match() {
        let verifier = WebhookVerifier::new(SECRET, 300);
        let payload = b"{}";
        let good = hex::encode(verifier.sign(1_700_000_000, payload));
        let header = format!("t=1700000000,v1={},v1={}", "00".repeat(32), good);
        assert_eq!(verifier.verify(payload, Some(&header), 1_700_000_000), Ok(()));
    }

    #[test]
    fn test_signature_failures() {
        let verifier = WebhookVerifier::new(SECRET, 300);
        let payload = br#"{"id":"evt_1"}"#;
        let header = verifier.header_for(1_700_000_000, payload);

        assert_eq!(
            verifier.verify(payload, None, 1_700_000_000),
            Err(WebhookError::MissingSignature)
        );
        assert_eq!(
            verifier.verify(payload, Some("garbage"), 1_700_000_000),
            Err(WebhookError::MalformedHeader)
        );
        assert_eq!(
            verifier.verify(payload, Some(&header), 1_700_000_301),
            Err(WebhookError::TimestampOutOfTolerance)
        );
        assert_eq!(
            verifier.verify(br#"{"id":"evt_2"}"#, Some(&header), 1_700_000_000),
            Err(WebhookError::SignatureMismatch)
        );

        let other = WebhookVerifier::new("whsec_other", 300);
        assert_eq!(
            other.verify(payload, Some(&header), 1_700_000_000),
            Err(WebhookError::SignatureMismatch)
        );
    }

    #[test]
    fn test_checkout_session_attribution_fields() {
        let referral = Uuid::new_v4();
        let session: CheckoutSession = serde_json::from_value(serde_json::json!({
            "id": "cs_1",
            "customer_details": { "email": " Maria@Example.com " },
            "client_reference_id": referral.to_string(),
            "metadata": { "affiliate_code": " ", "price_id": "price_1" }
        }))
        .unwrap();

        assert_eq!(session.email().as_deref(), Some("maria@example.com"));
        assert_eq!(session.referral_id(), Some(referral));
        assert_eq!(session.metadata("affiliate_code"), None);
        assert_eq!(session.metadata("price_id").as_deref(), Some("price_1"));
    }

    #[test]
    fn test_parse_rejects_non_event() {
        assert!(matches!(
            StripeEvent::parse(b"not json"),
            Err(WebhookError::InvalidPayload(_))
        ));
    }
}
