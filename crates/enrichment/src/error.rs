use thiserror::Error;

use crate::billing::BillingError;
use crate::store::StoreError;

/// Failures that abort a whole search; they surface as a failed attempt of
/// the job. Per-entity provider failures never reach this type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnrichmentError {
    #[error("{0}")]
    Systemic(String),

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EnrichmentError {
    pub fn systemic(msg: impl Into<String>) -> Self {
        Self::Systemic(msg.into())
    }
}
