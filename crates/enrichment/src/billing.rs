//! Billing guard: a discovered email is charged at most once per contact.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use prospector_core::{ContactId, JobId, UserId};

use crate::ledger::{CreditLedger, DeductOutcome, DeductRequest, LedgerError};
use crate::waterfall::EnrichmentOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingConfig {
    /// Credits charged for one discovered email.
    pub email_cost: u32,
    /// Balance required before enrichment starts.
    pub min_balance: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            email_cost: 5,
            min_balance: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingError {
    #[error("insufficient credits: balance {balance}, required {required}")]
    InsufficientCredits { balance: i64, required: i64 },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Settlement {
    Charged { amount: u32, new_balance: i64 },
    AlreadyCharged { balance: i64 },
    NotBillable,
}

#[derive(Clone)]
pub struct BillingGuard {
    ledger: Arc<dyn CreditLedger>,
    config: BillingConfig,
}

impl BillingGuard {
    pub fn new(ledger: Arc<dyn CreditLedger>, config: BillingConfig) -> Self {
        Self { ledger, config }
    }

    pub fn config(&self) -> BillingConfig {
        self.config
    }

    /// Idempotency key of the discovery charge for one contact.
    pub fn idempotency_key(contact_id: ContactId) -> String {
        format!("email_discovery:{contact_id}")
    }

    /// Fail fast when the user cannot afford enrichment.
    pub async fn precheck(&self, user_id: UserId) -> Result<i64, BillingError> {
        let balance = self.ledger.get_balance(user_id).await?;
        if balance < self.config.min_balance {
            return Err(BillingError::InsufficientCredits {
                balance,
                required: self.config.min_balance,
            });
        }
        Ok(balance)
    }

    /// Charge for `outcome` if it is a new discovery.
    pub async fn settle(
        &self,
        user_id: UserId,
        job_id: Option<JobId>,
        contact_id: ContactId,
        outcome: &EnrichmentOutcome,
    ) -> Result<Settlement, BillingError> {
        let EnrichmentOutcome::Discovered { tier, .. } = outcome else {
            return Ok(Settlement::NotBillable);
        };

        let request = DeductRequest {
            idempotency_key: Self::idempotency_key(contact_id),
            amount: self.config.email_cost,
            reason: format!("email discovery via {tier}"),
            job_id,
            contact_id: Some(contact_id),
        };

        match self.ledger.deduct(user_id, request).await? {
            DeductOutcome::Charged { new_balance } => {
                tracing::info!(
                    user_id = %user_id,
                    contact_id = %contact_id,
                    amount = self.config.email_cost,
                    new_balance,
                    "charged email discovery"
                );
                Ok(Settlement::Charged {
                    amount: self.config.email_cost,
                    new_balance,
                })
            }
            DeductOutcome::AlreadyCharged { balance } => {
                tracing::debug!(contact_id = %contact_id, "discovery already charged");
                Ok(Settlement::AlreadyCharged { balance })
            }
        }
    }
}
