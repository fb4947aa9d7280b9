//! Credit ledger collaborator.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use prospector_core::{ContactId, JobId, UserId};

/// A deduction keyed for idempotency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeductRequest {
    /// At most one entry per key and user is ever written.
    pub idempotency_key: String,
    pub amount: u32,
    pub reason: String,
    pub job_id: Option<JobId>,
    pub contact_id: Option<ContactId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeductOutcome {
    Charged { new_balance: i64 },
    /// The key was already used; nothing changed.
    AlreadyCharged { balance: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GrantOutcome {
    Granted { new_balance: i64 },
    /// The key was already used; nothing changed.
    AlreadyGranted { balance: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: UserId,
    pub idempotency_key: Option<String>,
    /// Negative for deductions.
    pub delta: i64,
    pub balance_after: i64,
    pub reason: String,
    pub job_id: Option<JobId>,
    pub contact_id: Option<ContactId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("ledger storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn get_balance(&self, user_id: UserId) -> Result<i64, LedgerError>;

    /// Deduct `request.amount` unless the idempotency key was already used.
    ///
    /// Never fails for a low balance; callers gate on [`CreditLedger::get_balance`].
    async fn deduct(&self, user_id: UserId, request: DeductRequest) -> Result<DeductOutcome, LedgerError>;

    /// Add credits; returns the new balance.
    async fn grant(&self, user_id: UserId, amount: u32, reason: &str) -> Result<i64, LedgerError>;

    /// Add credits unless `idempotency_key` was already used by this user.
    ///
    /// Grants and deductions share one key space.
    async fn grant_once(
        &self,
        user_id: UserId,
        amount: u32,
        idempotency_key: &str,
        reason: &str,
    ) -> Result<GrantOutcome, LedgerError>;

    /// Most recent entries first.
    async fn entries(&self, user_id: UserId, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError>;
}

#[derive(Debug, Default)]
struct Account {
    balance: i64,
    keys: HashSet<String>,
    entries: Vec<LedgerEntry>,
}

/// In-memory ledger for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCreditLedger {
    accounts: RwLock<HashMap<UserId, Account>>,
}

impl InMemoryCreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned<T>(_: T) -> LedgerError {
    LedgerError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl CreditLedger for InMemoryCreditLedger {
    async fn get_balance(&self, user_id: UserId) -> Result<i64, LedgerError> {
        let accounts = self.accounts.read().map_err(poisoned)?;
        Ok(accounts.get(&user_id).map(|a| a.balance).unwrap_or(0))
    }

    async fn deduct(&self, user_id: UserId, request: DeductRequest) -> Result<DeductOutcome, LedgerError> {
        if request.amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        let account = accounts.entry(user_id).or_default();
        if account.keys.contains(&request.idempotency_key) {
            return Ok(DeductOutcome::AlreadyCharged {
                balance: account.balance,
            });
        }

        account.balance -= i64::from(request.amount);
        account.keys.insert(request.idempotency_key.clone());
        account.entries.push(LedgerEntry {
            id: Uuid::now_v7(),
            user_id,
            idempotency_key: Some(request.idempotency_key),
            delta: -i64::from(request.amount),
            balance_after: account.balance,
            reason: request.reason,
            job_id: request.job_id,
            contact_id: request.contact_id,
            created_at: Utc::now(),
        });
        Ok(DeductOutcome::Charged {
            new_balance: account.balance,
        })
    }

    async fn grant(&self, user_id: UserId, amount: u32, reason: &str) -> Result<i64, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        let account = accounts.entry(user_id).or_default();
        account.balance += i64::from(amount);
        account.entries.push(LedgerEntry {
            id: Uuid::now_v7(),
            user_id,
            idempotency_key: None,
            delta: i64::from(amount),
            balance_after: account.balance,
            reason: reason.to_string(),
            job_id: None,
            contact_id: None,
            created_at: Utc::now(),
        });
        Ok(account.balance)
    }

    async fn grant_once(
        &self,
        user_id: UserId,
        amount: u32,
        idempotency_key: &str,
        reason: &str,
    ) -> Result<GrantOutcome, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        let account = accounts.entry(user_id).or_default();
        if !account.keys.insert(idempotency_key.to_string()) {
            return Ok(GrantOutcome::AlreadyGranted {
                balance: account.balance,
            });
        }

        account.balance += i64::from(amount);
        account.entries.push(LedgerEntry {
            id: Uuid::now_v7(),
            user_id,
            idempotency_key: Some(idempotency_key.to_string()),
            delta: i64::from(amount),
            balance_after: account.balance,
            reason: reason.to_string(),
            job_id: None,
            contact_id: None,
            created_at: Utc::now(),
        });
        Ok(GrantOutcome::Granted {
            new_balance: account.balance,
        })
    }

    async fn entries(&self, user_id: UserId, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let accounts = self.accounts.read().map_err(poisoned)?;
        Ok(accounts
            .get(&user_id)
            .map(|a| a.entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
