//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use prospector_core::{DomainError, UserId};

use super::types::{JobId, JobPatch, JobProgress, JobStatus, NewSearchJob, RetryPolicy, SearchJob};

/// Error message recorded when a job was found `processing` after a restart.
pub const INTERRUPTED: &str = "execution interrupted";

/// Durable lifecycle store for search jobs.
///
/// The `status` column is the only mutual-exclusion gate between executors:
/// every status change is validated against the current row, and claims are
/// atomic.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Validate and enqueue a new job in `pending`.
    async fn create_job(&self, new: NewSearchJob) -> Result<JobId, JobStoreError>;

    /// Fetch a job owned by `user_id`.
    async fn get_job(&self, job_id: JobId, user_id: UserId) -> Result<Option<SearchJob>, JobStoreError>;

    /// Newest first.
    async fn list_jobs(&self, user_id: UserId, limit: usize) -> Result<Vec<SearchJob>, JobStoreError>;

    /// Compare-and-set status transition.
    async fn update_status(&self, job_id: JobId, status: JobStatus, patch: JobPatch) -> Result<SearchJob, JobStoreError>;

    /// Only accepted while the job is `processing`.
    async fn update_progress(&self, job_id: JobId, progress: JobProgress) -> Result<(), JobStoreError>;

    /// Remove a `pending` job.
    async fn cancel_job(&self, job_id: JobId, user_id: UserId) -> Result<(), JobStoreError>;

    /// Claim the highest-priority ready job, oldest first on ties.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<SearchJob>, JobStoreError>;

    /// Claim one specific pending job for manual execution.
    async fn claim(&self, job_id: JobId, user_id: UserId, now: DateTime<Utc>) -> Result<SearchJob, JobStoreError>;

    /// Route `processing` jobs started before `cutoff` through the failure path.
    async fn requeue_stale(
        &self,
        cutoff: DateTime<Utc>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<usize, JobStoreError>;

    /// Move non-processing jobs past their `expires_at` to `expired`.
    async fn expire_jobs(&self, now: DateTime<Utc>) -> Result<usize, JobStoreError>;

    /// Delete `expired` jobs whose `expires_at` is before `before`.
    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<usize, JobStoreError>;

    /// Per-status counts, optionally for one user.
    async fn stats(&self, user_id: Option<UserId>) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<DomainError> for JobStoreError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidStateTransition { from, to } => Self::InvalidStateTransition { from, to },
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub expired: usize,
}

impl JobStats {
    pub(crate) fn count(&mut self, status: JobStatus, n: usize) {
        match status {
            JobStatus::Pending => self.pending += n,
            JobStatus::Processing => self.processing += n,
            JobStatus::Completed => self.completed += n,
            JobStatus::Failed => self.failed += n,
            JobStatus::Expired => self.expired += n,
        }
    }
}

/// Settings a store applies when creating jobs.
#[derive(Debug, Clone)]
pub struct JobDefaults {
    pub max_retries: u32,
    pub retention: chrono::Duration,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retention: chrono::Duration::days(7),
        }
    }
}

/// In-memory job store for development and testing.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, SearchJob>>,
    defaults: JobDefaults,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(defaults: JobDefaults) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            defaults,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert a fully-formed job, bypassing validation. Test seeding only.
    #[cfg(test)]
    pub(crate) fn insert_raw(&self, job: SearchJob) {
        self.jobs.write().unwrap().insert(job.id, job);
    }
}

fn poisoned<T>(_: T) -> JobStoreError {
    JobStoreError::Storage("lock poisoned".into())
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, new: NewSearchJob) -> Result<JobId, JobStoreError> {
        new.validate()?;
        let job = new.into_job(self.defaults.max_retries, self.defaults.retention, Utc::now());
        let id = job.id;
        self.jobs.write().map_err(poisoned)?.insert(id, job);
        Ok(id)
    }

    async fn get_job(&self, job_id: JobId, user_id: UserId) -> Result<Option<SearchJob>, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        Ok(jobs.get(&job_id).filter(|j| j.user_id == user_id).cloned())
    }

    async fn list_jobs(&self, user_id: UserId, limit: usize) -> Result<Vec<SearchJob>, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut result: Vec<_> = jobs.values().filter(|j| j.user_id == user_id).cloned().collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        result.truncate(limit);
        Ok(result)
    }

    async fn update_status(&self, job_id: JobId, status: JobStatus, patch: JobPatch) -> Result<SearchJob, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;

        // Apply on a copy so a rejected patch leaves the row untouched
        let mut next = job.clone();
        next.transition(status, patch, Utc::now())?;
        *job = next.clone();
        Ok(next)
    }

    async fn update_progress(&self, job_id: JobId, progress: JobProgress) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if job.status != JobStatus::Processing {
            return Err(JobStoreError::InvalidStateTransition {
                from: job.status.to_string(),
                to: "progress".into(),
            });
        }
        job.progress = progress;
        Ok(())
    }

    async fn cancel_job(&self, job_id: JobId, user_id: UserId) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let job = jobs
            .get(&job_id)
            .filter(|j| j.user_id == user_id)
            .ok_or(JobStoreError::NotFound(job_id))?;
        if job.status != JobStatus::Pending {
            return Err(JobStoreError::InvalidStateTransition {
                from: job.status.to_string(),
                to: "cancelled".into(),
            });
        }
        jobs.remove(&job_id);
        Ok(())
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<SearchJob>, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;

        let next_id = jobs
            .values()
            .filter(|j| j.is_ready(now))
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|j| j.id);

        let Some(id) = next_id else {
            return Ok(None);
        };
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.transition(JobStatus::Processing, JobPatch::default(), now)?;
        Ok(Some(job.clone()))
    }

    async fn claim(&self, job_id: JobId, user_id: UserId, now: DateTime<Utc>) -> Result<SearchJob, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let job = jobs
            .get_mut(&job_id)
            .filter(|j| j.user_id == user_id)
            .ok_or(JobStoreError::NotFound(job_id))?;
        job.transition(JobStatus::Processing, JobPatch::default(), now)?;
        Ok(job.clone())
    }

    async fn requeue_stale(
        &self,
        cutoff: DateTime<Utc>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<usize, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let mut count = 0;
        for job in jobs.values_mut() {
            let stale = job.status == JobStatus::Processing && job.started_at.is_some_and(|at| at < cutoff);
            if !stale {
                continue;
            }
            let (status, patch) = job.failure_transition(INTERRUPTED, policy, now);
            job.transition(status, patch, now)?;
            count += 1;
        }
        Ok(count)
    }

    async fn expire_jobs(&self, now: DateTime<Utc>) -> Result<usize, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let mut count = 0;
        for job in jobs.values_mut() {
            if job.expires_at < now && job.status.can_transition_to(JobStatus::Expired) {
                job.transition(JobStatus::Expired, JobPatch::default(), now)?;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<usize, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let before_len = jobs.len();
        jobs.retain(|_, j| !(j.status == JobStatus::Expired && j.expires_at < before));
        Ok(before_len - jobs.len())
    }

    async fn stats(&self, user_id: Option<UserId>) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut stats = JobStats::default();
        for job in jobs.values().filter(|j| user_id.is_none_or(|u| j.user_id == u)) {
            stats.count(job.status, 1);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prospector_enrichment::SearchType;

    fn new_job(user: UserId, query: &str) -> NewSearchJob {
        NewSearchJob::new(user, query, SearchType::Companies)
    }

    #[tokio::test]
    async fn create_and_get_is_user_scoped() {
        let store = InMemoryJobStore::new();
        let user = UserId::new();
        let id = store.create_job(new_job(user, "robotics")).await.unwrap();

        let job = store.get_job(id, user).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.max_retries, 3);
        assert!(store.get_job(id, UserId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_rejects_invalid_submission() {
        let store = InMemoryJobStore::new();
        let err = store.create_job(new_job(UserId::new(), "  ")).await.unwrap_err();
        assert!(matches!(err, JobStoreError::Validation(_)));
    }

    #[tokio::test]
    async fn claim_next_prefers_priority_then_age() {
        let store = InMemoryJobStore::new();
        let user = UserId::new();
        let low = store.create_job(new_job(user, "first")).await.unwrap();
        let mut urgent = new_job(user, "urgent");
        urgent.priority = 10;
        let high = store.create_job(urgent).await.unwrap();
        let later = store.create_job(new_job(user, "second")).await.unwrap();

        let now = Utc::now();
        assert_eq!(store.claim_next(now).await.unwrap().unwrap().id, high);
        assert_eq!(store.claim_next(now).await.unwrap().unwrap().id, low);
        assert_eq!(store.claim_next(now).await.unwrap().unwrap().id, later);
        assert!(store.claim_next(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_next_respects_backoff_gate() {
        let store = InMemoryJobStore::new();
        let mut job = new_job(UserId::new(), "gated").into_job(3, chrono::Duration::days(7), Utc::now());
        let now = Utc::now();
        job.next_attempt_at = Some(now + chrono::Duration::seconds(30));
        store.insert_raw(job);

        assert!(store.claim_next(now).await.unwrap().is_none());
        let claimed = store.claim_next(now + chrono::Duration::seconds(31)).await.unwrap();
        assert_eq!(claimed.unwrap().status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn a_job_can_only_be_claimed_once() {
        let store = Arc::new(InMemoryJobStore::new());
        let user = UserId::new();
        let id = store.create_job(new_job(user, "contested")).await.unwrap();

        let now = Utc::now();
        let (a, b) = tokio::join!(store.claim(id, user, now), store.claim(id, user, now));
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert!(store.claim_next(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_status_validates_transition() {
        let store = InMemoryJobStore::new();
        let user = UserId::new();
        let id = store.create_job(new_job(user, "q")).await.unwrap();

        let err = store
            .update_status(id, JobStatus::Completed, JobPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, JobStoreError::InvalidStateTransition { .. }));

        store.claim(id, user, Utc::now()).await.unwrap();
        let done = store
            .update_status(id, JobStatus::Completed, JobPatch::completed(serde_json::json!({"ok": true}), 4))
            .await
            .unwrap();
        assert_eq!(done.result_count, 4);
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn progress_only_while_processing() {
        let store = InMemoryJobStore::new();
        let user = UserId::new();
        let id = store.create_job(new_job(user, "q")).await.unwrap();
        let progress = JobProgress {
            phase: "enriching_emails".into(),
            completed: 1,
            total: 3,
        };

        assert!(store.update_progress(id, progress.clone()).await.is_err());
        store.claim(id, user, Utc::now()).await.unwrap();
        store.update_progress(id, progress.clone()).await.unwrap();
        assert_eq!(store.get_job(id, user).await.unwrap().unwrap().progress, progress);
    }

    #[tokio::test]
    async fn cancel_only_pending() {
        let store = InMemoryJobStore::new();
        let user = UserId::new();
        let pending = store.create_job(new_job(user, "a")).await.unwrap();
        let running = store.create_job(new_job(user, "b")).await.unwrap();
        store.claim(running, user, Utc::now()).await.unwrap();

        assert!(matches!(
            store.cancel_job(pending, UserId::new()).await,
            Err(JobStoreError::NotFound(_))
        ));
        store.cancel_job(pending, user).await.unwrap();
        assert!(store.get_job(pending, user).await.unwrap().is_none());
        assert!(matches!(
            store.cancel_job(running, user).await,
            Err(JobStoreError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn stale_processing_jobs_are_requeued_with_backoff() {
        let store = InMemoryJobStore::new();
        let user = UserId::new();
        let id = store.create_job(new_job(user, "crash")).await.unwrap();
        let started = Utc::now() - chrono::Duration::minutes(30);
        store.claim(id, user, started).await.unwrap();

        let now = Utc::now();
        let n = store
            .requeue_stale(now - chrono::Duration::minutes(10), &RetryPolicy::default(), now)
            .await
            .unwrap();
        assert_eq!(n, 1);

        let job = store.get_job(id, user).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.error.as_deref(), Some(INTERRUPTED));
        assert!(job.next_attempt_at.is_some());
    }

    #[tokio::test]
    async fn expiry_skips_processing_and_purge_deletes() {
        let store = InMemoryJobStore::with_defaults(JobDefaults {
            max_retries: 3,
            retention: chrono::Duration::seconds(1),
        });
        let user = UserId::new();
        let idle = store.create_job(new_job(user, "idle")).await.unwrap();
        let busy = store.create_job(new_job(user, "busy")).await.unwrap();
        store.claim(busy, user, Utc::now()).await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(5);
        assert_eq!(store.expire_jobs(later).await.unwrap(), 1);
        let stats = store.stats(Some(user)).await.unwrap();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.processing, 1);

        assert_eq!(store.purge_expired(later).await.unwrap(), 1);
        assert!(store.get_job(idle, user).await.unwrap().is_none());
        assert!(store.get_job(busy, user).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_limited() {
        let store = InMemoryJobStore::new();
        let user = UserId::new();
        for q in ["a", "b", "c"] {
            store.create_job(new_job(user, q)).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let jobs = store.list_jobs(user, 2).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].query, "c");
        assert_eq!(jobs[1].query, "b");
    }
}
