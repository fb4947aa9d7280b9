//! Postgres-backed job store.
//!
//! ## Claiming
//!
//! `claim_next` picks and flips a row in one statement:
//!
//! ```sql
//! UPDATE search_jobs SET status = 'processing' ...
//! WHERE id = (SELECT id ... FOR UPDATE SKIP LOCKED)
//! ```
//!
//! Concurrent processors therefore never observe the same pending row, and a
//! row locked by one claimer is skipped rather than waited on.
//!
//! ## Transitions
//!
//! `update_status` and `requeue_stale` lock the row (`SELECT ... FOR UPDATE`),
//! validate the transition with [`SearchJob::transition`] and write the result
//! back in the same transaction.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | JobStoreError |
//! |------------|----------------------|---------------|
//! | Database (check violation) | `23514` | `Validation` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / RowNotFound / Other | N/A | `Storage` |

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use prospector_core::UserId;
use prospector_enrichment::{ContactSearchConfig, SearchType};

use super::store::{JobDefaults, JobStats, JobStore, JobStoreError, INTERRUPTED};
use super::types::{JobId, JobPatch, JobProgress, JobSource, JobStatus, NewSearchJob, RetryPolicy, SearchJob};

const JOB_COLUMNS: &str = "id, user_id, query, search_type, contact_config, status, progress, results, \
     result_count, error, source, priority, retry_count, max_retries, next_attempt_at, session_id, \
     created_at, started_at, completed_at, expires_at";

/// Postgres-backed job store.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
    defaults: JobDefaults,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            defaults: JobDefaults::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: JobDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    async fn lock_row(
        tx: &mut Transaction<'_, Postgres>,
        job_id: JobId,
    ) -> Result<Option<SearchJob>, JobStoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM search_jobs WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(job_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("lock_job", e))?;
        row.map(|r| decode_job(&r)).transpose()
    }

    async fn write_back(tx: &mut Transaction<'_, Postgres>, job: &SearchJob) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            UPDATE search_jobs SET
                status = $2,
                progress = $3,
                results = $4,
                result_count = $5,
                error = $6,
                retry_count = $7,
                next_attempt_at = $8,
                started_at = $9,
                completed_at = $10
            WHERE id = $1
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(encode(&job.progress)?)
        .bind(job.results.clone())
        .bind(to_i32(job.result_count))
        .bind(job.error.clone())
        .bind(to_i32(job.retry_count))
        .bind(job.next_attempt_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_job", e))?;
        Ok(())
    }

    /// Distinguish "no such job" from "wrong status" after a guarded write matched nothing.
    async fn explain_miss(&self, job_id: JobId, user_id: Option<UserId>, to: &str) -> JobStoreError {
        let status = sqlx::query_scalar::<_, String>(
            "SELECT status FROM search_jobs WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)",
        )
        .bind(job_id.as_uuid())
        .bind(user_id.map(|u| *u.as_uuid()))
        .fetch_optional(&*self.pool)
        .await;

        match status {
            Ok(Some(from)) => JobStoreError::InvalidStateTransition { from, to: to.to_string() },
            Ok(None) => JobStoreError::NotFound(job_id),
            Err(e) => map_sqlx_error("explain_miss", e),
        }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip_all, fields(user_id = %new.user_id), err)]
    async fn create_job(&self, new: NewSearchJob) -> Result<JobId, JobStoreError> {
        new.validate()?;
        let job = new.into_job(self.defaults.max_retries, self.defaults.retention, Utc::now());

        sqlx::query(
            r#"
            INSERT INTO search_jobs (
                id, user_id, query, search_type, contact_config, status, progress, results,
                result_count, error, source, priority, retry_count, max_retries, next_attempt_at,
                session_id, created_at, started_at, completed_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, 0, NULL, $8, $9, 0, $10, NULL, $11, $12, NULL, NULL, $13)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.user_id.as_uuid())
        .bind(&job.query)
        .bind(job.search_type.as_str())
        .bind(encode(&job.contact_config)?)
        .bind(job.status.as_str())
        .bind(encode(&job.progress)?)
        .bind(job.source.as_str())
        .bind(job.priority)
        .bind(to_i32(job.max_retries))
        .bind(&job.session_id)
        .bind(job.created_at)
        .bind(job.expires_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_job", e))?;

        Ok(job.id)
    }

    #[instrument(skip_all, fields(job_id = %job_id), err)]
    async fn get_job(&self, job_id: JobId, user_id: UserId) -> Result<Option<SearchJob>, JobStoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM search_jobs WHERE id = $1 AND user_id = $2");
        let row = sqlx::query(&sql)
            .bind(job_id.as_uuid())
            .bind(user_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;
        row.map(|r| decode_job(&r)).transpose()
    }

    #[instrument(skip_all, fields(user_id = %user_id), err)]
    async fn list_jobs(&self, user_id: UserId, limit: usize) -> Result<Vec<SearchJob>, JobStoreError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM search_jobs WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_jobs", e))?;
        rows.iter().map(decode_job).collect()
    }

    #[instrument(skip_all, fields(job_id = %job_id, status = %status), err)]
    async fn update_status(&self, job_id: JobId, status: JobStatus, patch: JobPatch) -> Result<SearchJob, JobStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut job = Self::lock_row(&mut tx, job_id)
            .await?
            .ok_or(JobStoreError::NotFound(job_id))?;
        job.transition(status, patch, Utc::now())?;
        Self::write_back(&mut tx, &job).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(job)
    }

    #[instrument(skip_all, fields(job_id = %job_id), err)]
    async fn update_progress(&self, job_id: JobId, progress: JobProgress) -> Result<(), JobStoreError> {
        let result = sqlx::query("UPDATE search_jobs SET progress = $2 WHERE id = $1 AND status = 'processing'")
            .bind(job_id.as_uuid())
            .bind(encode(&progress)?)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_progress", e))?;

        if result.rows_affected() == 0 {
            return Err(self.explain_miss(job_id, None, "progress").await);
        }
        Ok(())
    }

    #[instrument(skip_all, fields(job_id = %job_id), err)]
    async fn cancel_job(&self, job_id: JobId, user_id: UserId) -> Result<(), JobStoreError> {
        let result = sqlx::query("DELETE FROM search_jobs WHERE id = $1 AND user_id = $2 AND status = 'pending'")
            .bind(job_id.as_uuid())
            .bind(user_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("cancel_job", e))?;

        if result.rows_affected() == 0 {
            return Err(self.explain_miss(job_id, Some(user_id), "cancelled").await);
        }
        Ok(())
    }

    #[instrument(skip_all, err)]
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<SearchJob>, JobStoreError> {
        let sql = format!(
            r#"
            UPDATE search_jobs
            SET status = 'processing', started_at = $1, next_attempt_at = NULL
            WHERE id = (
                SELECT id FROM search_jobs
                WHERE status = 'pending'
                  AND (next_attempt_at IS NULL OR next_attempt_at <= $1)
                ORDER BY priority DESC, created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(now)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim_next", e))?;
        row.map(|r| decode_job(&r)).transpose()
    }

    #[instrument(skip_all, fields(job_id = %job_id), err)]
    async fn claim(&self, job_id: JobId, user_id: UserId, now: DateTime<Utc>) -> Result<SearchJob, JobStoreError> {
        let sql = format!(
            r#"
            UPDATE search_jobs
            SET status = 'processing', started_at = $3, next_attempt_at = NULL
            WHERE id = $1 AND user_id = $2 AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(job_id.as_uuid())
            .bind(user_id.as_uuid())
            .bind(now)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim", e))?;

        match row {
            Some(row) => decode_job(&row),
            None => Err(self
                .explain_miss(job_id, Some(user_id), JobStatus::Processing.as_str())
                .await),
        }
    }

    #[instrument(skip_all, err)]
    async fn requeue_stale(
        &self,
        cutoff: DateTime<Utc>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<usize, JobStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM search_jobs \
             WHERE status = 'processing' AND started_at < $1 FOR UPDATE SKIP LOCKED"
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("requeue_stale", e))?;

        let mut count = 0;
        for row in &rows {
            let mut job = decode_job(row)?;
            let (status, patch) = job.failure_transition(INTERRUPTED, policy, now);
            job.transition(status, patch, now)?;
            Self::write_back(&mut tx, &job).await?;
            count += 1;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(count)
    }

    #[instrument(skip_all, err)]
    async fn expire_jobs(&self, now: DateTime<Utc>) -> Result<usize, JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE search_jobs SET status = 'expired'
            WHERE status IN ('pending', 'completed', 'failed') AND expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("expire_jobs", e))?;
        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip_all, err)]
    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<usize, JobStoreError> {
        let result = sqlx::query("DELETE FROM search_jobs WHERE status = 'expired' AND expires_at < $1")
            .bind(before)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_expired", e))?;
        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip_all, err)]
    async fn stats(&self, user_id: Option<UserId>) -> Result<JobStats, JobStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS n FROM search_jobs
            WHERE ($1::uuid IS NULL OR user_id = $1)
            GROUP BY status
            "#,
        )
        .bind(user_id.map(|u| *u.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("stats", e))?;
            let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("stats", e))?;
            stats.count(JobStatus::from_str(&status)?, usize::try_from(n).unwrap_or(0));
        }
        Ok(stats)
    }
}

/// Raw `search_jobs` row.
struct SearchJobRow {
    id: uuid::Uuid,
    user_id: uuid::Uuid,
    query: String,
    search_type: String,
    contact_config: serde_json::Value,
    status: String,
    progress: serde_json::Value,
    results: Option<serde_json::Value>,
    result_count: i32,
    error: Option<String>,
    source: String,
    priority: i32,
    retry_count: i32,
    max_retries: i32,
    next_attempt_at: Option<DateTime<Utc>>,
    session_id: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for SearchJobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(SearchJobRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            query: row.try_get("query")?,
            search_type: row.try_get("search_type")?,
            contact_config: row.try_get("contact_config")?,
            status: row.try_get("status")?,
            progress: row.try_get("progress")?,
            results: row.try_get("results")?,
            result_count: row.try_get("result_count")?,
            error: row.try_get("error")?,
            source: row.try_get("source")?,
            priority: row.try_get("priority")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
            session_id: row.try_get("session_id")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

impl TryFrom<SearchJobRow> for SearchJob {
    type Error = JobStoreError;

    fn try_from(row: SearchJobRow) -> Result<Self, Self::Error> {
        let contact_config: ContactSearchConfig = decode(row.contact_config, "contact_config")?;
        let progress: JobProgress = decode(row.progress, "progress")?;
        Ok(SearchJob {
            id: JobId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            query: row.query,
            search_type: SearchType::parse(&row.search_type)?,
            contact_config,
            status: JobStatus::from_str(&row.status)?,
            progress,
            results: row.results,
            result_count: row.result_count.max(0) as u32,
            error: row.error,
            source: JobSource::from_str(&row.source)?,
            priority: row.priority,
            retry_count: row.retry_count.max(0) as u32,
            max_retries: row.max_retries.max(0) as u32,
            next_attempt_at: row.next_attempt_at,
            session_id: row.session_id,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            expires_at: row.expires_at,
        })
    }
}

fn decode_job(row: &PgRow) -> Result<SearchJob, JobStoreError> {
    let raw = SearchJobRow::from_row(row)
        .map_err(|e| JobStoreError::Storage(format!("failed to deserialize job row: {e}")))?;
    raw.try_into()
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value, column: &str) -> Result<T, JobStoreError> {
    serde_json::from_value(value).map_err(|e| JobStoreError::Storage(format!("invalid {column} column: {e}")))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, JobStoreError> {
    serde_json::to_value(value).map_err(|e| JobStoreError::Storage(format!("failed to encode column: {e}")))
}

fn to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Map SQLx errors to `JobStoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Check constraint violation
                Some("23514") => JobStoreError::Validation(msg),
                _ => JobStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => JobStoreError::Storage(format!("connection pool closed in {}", operation)),
        sqlx::Error::RowNotFound => JobStoreError::Storage(format!("unexpected row not found in {}", operation)),
        _ => JobStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
