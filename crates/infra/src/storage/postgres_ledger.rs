//! Postgres-backed [`CreditLedger`].
//!
//! Balances live in `credit_balances`, one row per user. Every change appends
//! to `credit_ledger`; a partial unique index on `(user_id, idempotency_key)`
//! guarantees a key (deduction or keyed grant) is used at most once even
//! across processes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use prospector_core::{ContactId, JobId, UserId};
use prospector_enrichment::{CreditLedger, DeductOutcome, DeductRequest, GrantOutcome, LedgerEntry, LedgerError};

#[derive(Debug, Clone)]
pub struct PostgresCreditLedger {
    pool: Arc<PgPool>,
}

impl PostgresCreditLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Lock the user's balance row, creating it at zero on first use.
    async fn lock_balance(tx: &mut Transaction<'_, Postgres>, user_id: UserId) -> Result<i64, LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO credit_balances (user_id, balance, updated_at)
            VALUES ($1, 0, now())
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("open_account", e))?;

        sqlx::query_scalar::<_, i64>("SELECT balance FROM credit_balances WHERE user_id = $1 FOR UPDATE")
            .bind(user_id.as_uuid())
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("lock_balance", e))
    }

    async fn key_used(tx: &mut Transaction<'_, Postgres>, user_id: UserId, key: &str) -> Result<bool, LedgerError> {
        let used = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM credit_ledger WHERE user_id = $1 AND idempotency_key = $2",
        )
        .bind(user_id.as_uuid())
        .bind(key)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("check_idempotency_key", e))?;
        Ok(used > 0)
    }

    async fn apply(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        delta: i64,
        reason: &str,
        key: Option<&str>,
        job_id: Option<JobId>,
        contact_id: Option<ContactId>,
    ) -> Result<i64, LedgerError> {
        let balance = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE credit_balances SET balance = balance + $2, updated_at = now()
            WHERE user_id = $1
            RETURNING balance
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(delta)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_balance", e))?;

        sqlx::query(
            r#"
            INSERT INTO credit_ledger (
                id, user_id, idempotency_key, delta, balance_after, reason, job_id, contact_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(user_id.as_uuid())
        .bind(key)
        .bind(delta)
        .bind(balance)
        .bind(reason)
        .bind(job_id.map(|j| *j.as_uuid()))
        .bind(contact_id.map(|c| *c.as_uuid()))
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("append_entry", e))?;

        Ok(balance)
    }
}

#[async_trait]
impl CreditLedger for PostgresCreditLedger {
    #[instrument(skip_all, fields(user_id = %user_id), err)]
    async fn get_balance(&self, user_id: UserId) -> Result<i64, LedgerError> {
        let balance = sqlx::query_scalar::<_, i64>("SELECT balance FROM credit_balances WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_balance", e))?;
        Ok(balance.unwrap_or(0))
    }

    #[instrument(skip_all, fields(user_id = %user_id, key = %request.idempotency_key), err)]
    async fn deduct(&self, user_id: UserId, request: DeductRequest) -> Result<DeductOutcome, LedgerError> {
        if request.amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Row lock serializes deductions per user
        let balance = Self::lock_balance(&mut tx, user_id).await?;

        if Self::key_used(&mut tx, user_id, &request.idempotency_key).await? {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback_transaction", e))?;
            debug!(key = %request.idempotency_key, "deduction already applied");
            return Ok(DeductOutcome::AlreadyCharged { balance });
        }

        let new_balance = Self::apply(
            &mut tx,
            user_id,
            -i64::from(request.amount),
            &request.reason,
            Some(&request.idempotency_key),
            request.job_id,
            request.contact_id,
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(DeductOutcome::Charged { new_balance })
    }

    #[instrument(skip_all, fields(user_id = %user_id, amount = amount), err)]
    async fn grant(&self, user_id: UserId, amount: u32, reason: &str) -> Result<i64, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Self::lock_balance(&mut tx, user_id).await?;
        let balance = Self::apply(&mut tx, user_id, i64::from(amount), reason, None, None, None).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(balance)
    }

    #[instrument(skip_all, fields(user_id = %user_id, key = %idempotency_key), err)]
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

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let balance = Self::lock_balance(&mut tx, user_id).await?;
        if Self::key_used(&mut tx, user_id, idempotency_key).await? {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback_transaction", e))?;
            debug!(key = %idempotency_key, "grant already applied");
            return Ok(GrantOutcome::AlreadyGranted { balance });
        }

        let new_balance =
            Self::apply(&mut tx, user_id, i64::from(amount), reason, Some(idempotency_key), None, None).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(GrantOutcome::Granted { new_balance })
    }

    #[instrument(skip_all, fields(user_id = %user_id), err)]
    async fn entries(&self, user_id: UserId, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, idempotency_key, delta, balance_after, reason, job_id, contact_id, created_at
            FROM credit_ledger
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("entries", e))?;

        rows.iter()
            .map(|row| {
                LedgerRow::from_row(row)
                    .map(Into::into)
                    .map_err(|e| LedgerError::Storage(format!("failed to deserialize ledger row: {e}")))
            })
            .collect()
    }
}

struct LedgerRow {
    id: Uuid,
    user_id: Uuid,
    idempotency_key: Option<String>,
    delta: i64,
    balance_after: i64,
    reason: String,
    job_id: Option<Uuid>,
    contact_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for LedgerRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LedgerRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            idempotency_key: row.try_get("idempotency_key")?,
            delta: row.try_get("delta")?,
            balance_after: row.try_get("balance_after")?,
            reason: row.try_get("reason")?,
            job_id: row.try_get("job_id")?,
            contact_id: row.try_get("contact_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<LedgerRow> for LedgerEntry {
    fn from(row: LedgerRow) -> Self {
        LedgerEntry {
            id: row.id,
            user_id: UserId::from_uuid(row.user_id),
            idempotency_key: row.idempotency_key,
            delta: row.delta,
            balance_after: row.balance_after,
            reason: row.reason,
            job_id: row.job_id.map(JobId::from_uuid),
            contact_id: row.contact_id.map(ContactId::from_uuid),
            created_at: row.created_at,
        }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            LedgerError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => LedgerError::Storage(format!("connection pool closed in {}", operation)),
        _ => LedgerError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
