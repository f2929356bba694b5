// In-process payment processor with scripted Connect accounts.
// Used by the unit and integration tests, no Stripe account required.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::services::stripe::{
    AccountCapabilities, ConnectedAccount, PaymentProcessor, ProcessorError, Transfer,
    TransferRequest,
};

/// Payment processor double that records transfers in memory
#[derive(Default)]
pub struct FakeProcessor {
    accounts: Mutex<HashMap<String, ConnectedAccount>>,
    transfers: Mutex<Vec<TransferRequest>>,
    transfer_error: Mutex<Option<String>>,
}

/// Poisoned locks are recovered, the guarded data stays consistent
fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn scripted_account(account_id: &str, ready: bool) -> ConnectedAccount {
    ConnectedAccount {
        id: account_id.to_string(),
        details_submitted: ready,
        charges_enabled: ready,
        payouts_enabled: ready,
        capabilities: AccountCapabilities {
            transfers: Some(if ready { "active" } else { "inactive" }.to_string()),
        },
    }
}

impl FakeProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account that can receive transfers
    pub fn add_ready_account(&self, account_id: &str) {
        self.set_account(account_id, true);
    }

    /// Create or replace an account, ready or still onboarding
    pub fn set_account(&self, account_id: &str, ready: bool) {
        locked(&self.accounts).insert(account_id.to_string(), scripted_account(account_id, ready));
    }

    /// Make every following transfer fail with this Stripe message
    pub fn fail_transfers_with(&self, message: &str) {
        *locked(&self.transfer_error) = Some(message.to_string());
    }

    pub fn transfers(&self) -> Vec<TransferRequest> {
        locked(&self.transfers).clone()
    }
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn create_connected_account(
        &self,
        _email: Option<&str>,
    ) -> Result<ConnectedAccount, ProcessorError> {
        let mut accounts = locked(&self.accounts);
        let account = scripted_account(&format!("acct_test_{}", accounts.len() + 1), false);
        accounts.insert(account.id.clone(), account.clone());
        Ok(account)
    }

    async fn create_onboarding_link(&self, account_id: &str) -> Result<String, ProcessorError> {
        Ok(format!("https://connect.stripe.test/setup/{}", account_id))
    }

    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, ProcessorError> {
        locked(&self.accounts)
            .get(account_id)
            .cloned()
            .ok_or_else(|| ProcessorError::Api {
                status: 404,
                code: Some("resource_missing".to_string()),
                message: format!("No such account: '{}'", account_id),
            })
    }

    async fn create_transfer(&self, transfer: &TransferRequest) -> Result<Transfer, ProcessorError> {
        if let Some(message) = locked(&self.transfer_error).clone() {
            return Err(ProcessorError::Api {
                status: 400,
                code: None,
                message,
            });
        }

        let mut transfers = locked(&self.transfers);
        transfers.push(transfer.clone());
        Ok(Transfer {
            id: format!("tr_test_{}", transfers.len()),
            amount: transfer.amount_cents,
            currency: transfer.currency.clone(),
            destination: Some(transfer.destination.clone()),
        })
    }
}
