//! Core job types and policies.

use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use prospector_core::{DomainError, DomainResult, UserId};
use prospector_enrichment::{ContactSearchConfig, SearchProgress, SearchRequest, SearchType};

pub use prospector_core::JobId;

const MAX_QUERY_LEN: usize = 500;
const MAX_RETRIES_CAP: u32 = 10;

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be claimed (also after a retryable failure)
    Pending,
    /// Claimed by exactly one executor
    Processing,
    Completed,
    /// Retries exhausted
    Failed,
    /// Removed from view by the retention sweep
    Expired,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Expired)
    }

    /// Allowed edges of the lifecycle.
    ///
    /// `processing -> pending` is the retry edge; `-> expired` is reserved
    /// for the retention sweep.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Pending)
                | (Pending, Expired)
                | (Completed, Expired)
                | (Failed, Expired)
        )
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "expired" => Ok(JobStatus::Expired),
            other => Err(DomainError::validation(format!("unknown job status: {other}"))),
        }
    }
}

/// Where a job was submitted from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    Frontend,
    #[default]
    Api,
    Cron,
}

impl JobSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobSource::Frontend => "frontend",
            JobSource::Api => "api",
            JobSource::Cron => "cron",
        }
    }
}

impl FromStr for JobSource {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "frontend" => Ok(JobSource::Frontend),
            "api" => Ok(JobSource::Api),
            "cron" => Ok(JobSource::Cron),
            other => Err(DomainError::validation(format!("unknown job source: {other}"))),
        }
    }
}

/// Phase label plus counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub phase: String,
    pub completed: u32,
    pub total: u32,
}

impl Default for JobProgress {
    fn default() -> Self {
        Self {
            phase: "queued".to_string(),
            completed: 0,
            total: 0,
        }
    }
}

impl From<SearchProgress> for JobProgress {
    fn from(p: SearchProgress) -> Self {
        let phase = serde_json::to_value(p.phase)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        Self {
            phase,
            completed: p.completed,
            total: p.total,
        }
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt-1)
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Default `max_retries` for new jobs
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi(attempt.saturating_sub(1).min(30) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * attempt as f64).min(max_ms),
        };

        // Deterministic jitter derived from the attempt number
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).clamp(0.0, max_ms.max(base_ms)) as u64)
    }

    /// Whether a job that has already been retried `retry_count` times may retry again.
    pub fn should_retry(&self, retry_count: u32, max_retries: u32) -> bool {
        retry_count < max_retries
    }
}

/// A durable search job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchJob {
    pub id: JobId,
    pub user_id: UserId,
    pub query: String,
    pub search_type: SearchType,
    pub contact_config: ContactSearchConfig,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub results: Option<serde_json::Value>,
    pub result_count: u32,
    pub error: Option<String>,
    pub source: JobSource,
    /// Higher runs first
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Backoff gate; the job is not claimable before this instant
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

/// Submission of a new job.
#[derive(Debug, Clone)]
pub struct NewSearchJob {
    pub user_id: UserId,
    pub query: String,
    pub search_type: SearchType,
    pub contact_config: ContactSearchConfig,
    pub source: JobSource,
    pub priority: i32,
    pub max_retries: Option<u32>,
    pub session_id: Option<String>,
}

impl NewSearchJob {
    pub fn new(user_id: UserId, query: impl Into<String>, search_type: SearchType) -> Self {
        Self {
            user_id,
            query: query.into(),
            search_type,
            contact_config: ContactSearchConfig::default(),
            source: JobSource::default(),
            priority: 0,
            max_retries: None,
            session_id: None,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        let query = self.query.trim();
        if query.is_empty() {
            return Err(DomainError::validation("query must not be empty"));
        }
        if query.chars().count() > MAX_QUERY_LEN {
            return Err(DomainError::validation(format!(
                "query must be at most {MAX_QUERY_LEN} characters"
            )));
        }
        if self.max_retries.is_some_and(|m| m > MAX_RETRIES_CAP) {
            return Err(DomainError::validation(format!(
                "max_retries must be at most {MAX_RETRIES_CAP}"
            )));
        }
        self.contact_config.validate()
    }

    /// Materialize a pending job.
    pub fn into_job(self, default_max_retries: u32, retention: chrono::Duration, now: DateTime<Utc>) -> SearchJob {
        SearchJob {
            id: JobId::new(),
            user_id: self.user_id,
            query: self.query.trim().to_string(),
            search_type: self.search_type,
            contact_config: self.contact_config,
            status: JobStatus::Pending,
            progress: JobProgress::default(),
            results: None,
            result_count: 0,
            error: None,
            source: self.source,
            priority: self.priority,
            retry_count: 0,
            max_retries: self.max_retries.unwrap_or(default_max_retries),
            next_attempt_at: None,
            session_id: self.session_id,
            created_at: now,
            started_at: None,
            completed_at: None,
            expires_at: now + retention,
        }
    }
}

/// Field changes written together with a status transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub results: Option<serde_json::Value>,
    pub result_count: Option<u32>,
    pub error: Option<String>,
    pub retry_count: Option<u32>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl JobPatch {
    pub fn completed(results: serde_json::Value, result_count: u32) -> Self {
        Self {
            results: Some(results),
            result_count: Some(result_count),
            ..Default::default()
        }
    }

    pub fn retry(error: impl Into<String>, retry_count: u32, next_attempt_at: DateTime<Utc>) -> Self {
        Self {
            error: Some(error.into()),
            retry_count: Some(retry_count),
            next_attempt_at: Some(next_attempt_at),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

impl SearchJob {
    /// Claimable at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.next_attempt_at.is_none_or(|at| at <= now)
    }

    pub fn to_request(&self) -> SearchRequest {
        SearchRequest {
            job_id: self.id,
            user_id: self.user_id,
            query: self.query.clone(),
            search_type: self.search_type,
            contact_config: self.contact_config.clone(),
        }
    }

    /// Apply a validated transition and its patch.
    pub fn transition(&mut self, next: JobStatus, patch: JobPatch, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_transition(self.status.as_str(), next.as_str()));
        }

        match next {
            JobStatus::Processing => {
                self.started_at = Some(now);
                self.next_attempt_at = None;
            }
            JobStatus::Completed => {
                self.completed_at = Some(now);
                self.error = None;
            }
            JobStatus::Failed => {
                self.completed_at = Some(now);
            }
            JobStatus::Pending | JobStatus::Expired => {}
        }

        if let Some(results) = patch.results {
            self.results = Some(results);
        }
        if let Some(count) = patch.result_count {
            self.result_count = count;
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
        if let Some(retry_count) = patch.retry_count {
            if retry_count > self.max_retries {
                return Err(DomainError::invariant("retry_count exceeds max_retries"));
            }
            self.retry_count = retry_count;
        }
        if patch.next_attempt_at.is_some() {
            self.next_attempt_at = patch.next_attempt_at;
        }
        self.status = next;
        Ok(())
    }

    /// The transition a failed attempt leads to: back to `pending` with backoff
    /// while retries remain, otherwise terminal `failed`.
    pub fn failure_transition(&self, error: &str, policy: &RetryPolicy, now: DateTime<Utc>) -> (JobStatus, JobPatch) {
        if policy.should_retry(self.retry_count, self.max_retries) {
            let retry_count = self.retry_count + 1;
            let delay = policy.delay_for_attempt(retry_count);
            let next = now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
            (JobStatus::Pending, JobPatch::retry(error, retry_count, next))
        } else {
            (JobStatus::Failed, JobPatch::failed(error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> SearchJob {
        NewSearchJob::new(UserId::new(), "  fintech in berlin ", SearchType::Companies).into_job(
            3,
            chrono::Duration::days(7),
            Utc::now(),
        )
    }

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(30), Duration::from_secs(10));
    }

    #[test]
    fn fixed_and_linear_backoff() {
        let fixed = RetryPolicy::fixed(3, Duration::from_millis(500));
        assert_eq!(fixed.delay_for_attempt(1), fixed.delay_for_attempt(3));

        let linear = RetryPolicy {
            strategy: BackoffStrategy::Linear,
            base_delay: Duration::from_millis(100),
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(linear.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let policy = RetryPolicy::default();
        for attempt in 1..20 {
            assert!(policy.delay_for_attempt(attempt) <= policy.max_delay);
        }
    }

    #[test]
    fn lifecycle_edges() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Expired));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Processing.can_transition_to(Expired));
        assert!(!Expired.can_transition_to(Pending));
    }

    #[test]
    fn new_job_is_pending_with_defaults() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.query, "fintech in berlin");
        assert_eq!(job.max_retries, 3);
        assert_eq!(job.expires_at - job.created_at, chrono::Duration::days(7));
    }

    #[test]
    fn failure_path_retries_until_exhausted() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let mut job = job();
        job.transition(JobStatus::Processing, JobPatch::default(), now).unwrap();

        for expected in 1..=3 {
            let (status, patch) = job.failure_transition("boom", &policy, now);
            assert_eq!(status, JobStatus::Pending);
            job.transition(status, patch, now).unwrap();
            assert_eq!(job.retry_count, expected);
            assert!(job.next_attempt_at.is_some_and(|at| at > now));
            assert!(!job.is_ready(now));
            job.transition(JobStatus::Processing, JobPatch::default(), now).unwrap();
        }

        let (status, patch) = job.failure_transition("boom", &policy, now);
        assert_eq!(status, JobStatus::Failed);
        job.transition(status, patch, now).unwrap();
        assert_eq!(job.retry_count, 3);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut job = job();
        let err = job.transition(JobStatus::Completed, JobPatch::default(), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn validation_rejects_blank_query_and_excess_retries() {
        let mut new = NewSearchJob::new(UserId::new(), "   ", SearchType::Companies);
        assert!(new.validate().is_err());
        new.query = "ok".into();
        new.max_retries = Some(11);
        assert!(new.validate().is_err());
        new.max_retries = Some(3);
        assert!(new.validate().is_ok());
    }
}
