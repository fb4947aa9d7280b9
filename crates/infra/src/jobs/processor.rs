//! Background job processor with retry and backoff.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use prospector_core::UserId;

use super::runner::{JobOutput, SearchJobRunner, StoreProgress};
use super::store::{JobStore, JobStoreError};
use super::types::{JobId, JobPatch, JobStatus, RetryPolicy, SearchJob};

/// Job processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// How often to poll for a ready job
    pub poll_interval: Duration,
    /// Hard limit on one execution
    pub job_timeout: Duration,
    pub retry_policy: RetryPolicy,
    /// A `processing` job older than this is treated as interrupted
    pub stale_after: Duration,
    /// How often stale recovery and the retention sweep run
    pub sweep_interval: Duration,
    /// How long `expired` jobs are kept before deletion
    pub purge_grace: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            job_timeout: Duration::from_secs(300),
            retry_policy: RetryPolicy::default(),
            stale_after: Duration::from_secs(360),
            sweep_interval: Duration::from_secs(60),
            purge_grace: Duration::from_secs(24 * 3600),
            name: "search-job-processor".to_string(),
        }
    }
}

impl ProcessorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Also moves `stale_after` so a live job is never mistaken for an interrupted one.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self.stale_after = self.stale_after.max(timeout + Duration::from_secs(60));
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// Processor runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ProcessorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
    pub jobs_recovered: u64,
    pub jobs_expired: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Store(#[from] JobStoreError),

    /// The detached execution task panicked or was aborted.
    #[error("job execution task failed: {0}")]
    Task(String),
}

/// What one sweep changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub expired: usize,
    pub purged: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.requeued == 0 && self.expired == 0 && self.purged == 0
    }
}

/// Polls the job store, runs claimed jobs and routes failures through the
/// retry policy.
///
/// Any number of processors may share one store; the store's claim is the
/// only coordination between them.
#[derive(Clone)]
pub struct JobProcessor {
    store: Arc<dyn JobStore>,
    runner: Arc<dyn SearchJobRunner>,
    config: ProcessorConfig,
    stats: Arc<Mutex<ProcessorStats>>,
}

impl JobProcessor {
    pub fn new(store: Arc<dyn JobStore>, runner: Arc<dyn SearchJobRunner>, config: ProcessorConfig) -> Self {
        Self {
            store,
            runner,
            config,
            stats: Arc::new(Mutex::new(ProcessorStats::default())),
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn stats(&self) -> ProcessorStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn update_stats(&self, f: impl FnOnce(&mut ProcessorStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Claim at most one ready job and run it to a recorded outcome.
    pub async fn tick(&self) -> Result<Option<SearchJob>, ProcessorError> {
        let Some(job) = self.store.claim_next(Utc::now()).await? else {
            return Ok(None);
        };
        debug!(processor = %self.config.name, job_id = %job.id, "claimed job");
        self.execute(job).await.map(Some)
    }

    /// Manually run one pending job now, through the same claim guard.
    ///
    /// The claimed job runs on its own task, so dropping the returned future
    /// (a disconnected HTTP client) does not strand it in `processing`.
    pub async fn execute_now(&self, job_id: JobId, user_id: UserId) -> Result<SearchJob, ProcessorError> {
        let job = self.store.claim(job_id, user_id, Utc::now()).await?;
        info!(processor = %self.config.name, job_id = %job.id, "manual execution");
        let processor = self.clone();
        tokio::spawn(async move { processor.execute(job).await })
            .await
            .map_err(|e| ProcessorError::Task(e.to_string()))?
    }

    async fn execute(&self, job: SearchJob) -> Result<SearchJob, ProcessorError> {
        info!(
            processor = %self.config.name,
            job_id = %job.id,
            user_id = %job.user_id,
            attempt = job.retry_count + 1,
            "executing job"
        );
        self.update_stats(|s| s.current_running += 1);

        let outcome = self.run_with_timeout(&job).await;
        let recorded = match outcome {
            Ok(output) => {
                self.store
                    .update_status(job.id, JobStatus::Completed, JobPatch::completed(output.results, output.result_count))
                    .await
            }
            Err(reason) => {
                let (status, patch) = job.failure_transition(&reason, &self.config.retry_policy, Utc::now());
                warn!(
                    processor = %self.config.name,
                    job_id = %job.id,
                    error = %reason,
                    next_status = %status,
                    "job attempt failed"
                );
                self.store.update_status(job.id, status, patch).await
            }
        };

        self.update_stats(|s| {
            s.current_running = s.current_running.saturating_sub(1);
            s.jobs_processed += 1;
            match recorded.as_ref().map(|j| j.status) {
                Ok(JobStatus::Completed) => s.jobs_succeeded += 1,
                Ok(JobStatus::Pending) => s.jobs_retried += 1,
                _ => s.jobs_failed += 1,
            }
        });

        let job = recorded?;
        info!(
            processor = %self.config.name,
            job_id = %job.id,
            status = %job.status,
            result_count = job.result_count,
            "job attempt recorded"
        );
        Ok(job)
    }

    async fn run_with_timeout(&self, job: &SearchJob) -> Result<JobOutput, String> {
        let progress = StoreProgress::new(self.store.clone(), job.id);
        match tokio::time::timeout(self.config.job_timeout, self.runner.run(job, &progress)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "job timed out after {}s",
                self.config.job_timeout.as_secs_f64()
            )),
        }
    }

    /// Requeue jobs left `processing` by a crashed process.
    pub async fn recover(&self) -> Result<usize, ProcessorError> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::from_std(self.config.stale_after).unwrap_or(chrono::Duration::zero());
        let n = self.store.requeue_stale(cutoff, &self.config.retry_policy, now).await?;
        self.update_stats(|s| s.jobs_recovered += n as u64);
        Ok(n)
    }

    /// Requeue stale `processing` jobs, expire jobs past their retention and
    /// purge old expired rows.
    pub async fn sweep(&self) -> Result<SweepReport, ProcessorError> {
        let requeued = self.recover().await?;
        let now = Utc::now();
        let expired = self.store.expire_jobs(now).await?;
        let before = now - chrono::Duration::from_std(self.config.purge_grace).unwrap_or(chrono::Duration::zero());
        let purged = self.store.purge_expired(before).await?;
        self.update_stats(|s| s.jobs_expired += expired as u64);
        Ok(SweepReport {
            requeued,
            expired,
            purged,
        })
    }

    /// Run the poll loop on the current tokio runtime.
    pub fn spawn(self: Arc<Self>) -> ProcessorHandle {
        let shutdown = Arc::new(Notify::new());
        let stats = self.stats.clone();
        let signal = shutdown.clone();
        let join = tokio::spawn(async move { self.run_loop(signal).await });

        ProcessorHandle {
            shutdown,
            join: Some(join),
            stats,
        }
    }

    async fn run_loop(&self, shutdown: Arc<Notify>) {
        info!(
            processor = %self.config.name,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "job processor started"
        );
        let started = Instant::now();

        match self.recover().await {
            Ok(0) => {}
            Ok(n) => warn!(processor = %self.config.name, count = n, "requeued interrupted jobs"),
            Err(e) => error!(processor = %self.config.name, error = %e, "failed to recover interrupted jobs"),
        }

        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = poll.tick() => {
                    self.update_stats(|s| s.uptime_secs = started.elapsed().as_secs());
                    if let Err(e) = self.tick().await {
                        error!(processor = %self.config.name, error = %e, "job tick failed");
                    }
                }
                _ = sweep.tick() => {
                    match self.sweep().await {
                        Ok(report) if report.is_empty() => {}
                        Ok(report) => info!(
                            processor = %self.config.name,
                            requeued = report.requeued,
                            expired = report.expired,
                            purged = report.purged,
                            "sweep"
                        ),
                        Err(e) => error!(processor = %self.config.name, error = %e, "sweep failed"),
                    }
                }
            }
        }

        info!(processor = %self.config.name, "job processor stopped");
    }
}

/// Handle to control a running processor.
#[derive(Debug)]
pub struct ProcessorHandle {
    shutdown: Arc<Notify>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<ProcessorStats>>,
}

impl ProcessorHandle {
    /// Request graceful shutdown. A job in flight finishes first.
    pub async fn shutdown(mut self) {
        self.shutdown.notify_one();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }

    /// Get current processor statistics.
    pub fn stats(&self) -> ProcessorStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use prospector_enrichment::{EnrichmentError, ProgressSink, SearchPhase, SearchProgress, SearchType};

    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::NewSearchJob;

    /// Fails the first `failures` runs, then succeeds.
    struct FlakyRunner {
        failures: usize,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FlakyRunner {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new(0)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SearchJobRunner for FlakyRunner {
        async fn run(&self, _job: &SearchJob, progress: &dyn ProgressSink) -> Result<JobOutput, EnrichmentError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            progress.report(SearchProgress::new(SearchPhase::DiscoveringCompanies, 0, 1)).await;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if call < self.failures {
                return Err(EnrichmentError::systemic("provider outage"));
            }
            Ok(JobOutput {
                results: serde_json::json!({ "contacts_found": 2 }),
                result_count: 2,
            })
        }
    }

    fn instant_retries() -> ProcessorConfig {
        ProcessorConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_retry_policy(RetryPolicy::fixed(3, Duration::ZERO))
    }

    async fn setup(runner: Arc<FlakyRunner>, config: ProcessorConfig) -> (Arc<InMemoryJobStore>, JobProcessor, JobId, UserId) {
        let store = InMemoryJobStore::arc();
        let user = UserId::new();
        let id = store
            .create_job(NewSearchJob::new(user, "logistics startups", SearchType::Companies))
            .await
            .unwrap();
        let processor = JobProcessor::new(store.clone(), runner, config);
        (store, processor, id, user)
    }

    #[tokio::test]
    async fn successful_job_completes_with_results() {
        let runner = Arc::new(FlakyRunner::new(0));
        let (store, processor, id, user) = setup(runner, instant_retries()).await;

        let job = processor.tick().await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result_count, 2);

        let stored = store.get_job(id, user).await.unwrap().unwrap();
        assert_eq!(stored.progress.phase, "discovering_companies");
        assert!(stored.results.is_some());
        assert_eq!(processor.stats().jobs_succeeded, 1);
    }

    #[tokio::test]
    async fn transient_failure_retries_then_succeeds() {
        let runner = Arc::new(FlakyRunner::new(1));
        let (_store, processor, _id, _user) = setup(runner.clone(), instant_retries()).await;

        let first = processor.tick().await.unwrap().unwrap();
        assert_eq!(first.status, JobStatus::Pending);
        assert_eq!(first.retry_count, 1);
        assert_eq!(first.error.as_deref(), Some("provider outage"));

        let second = processor.tick().await.unwrap().unwrap();
        assert_eq!(second.status, JobStatus::Completed);
        assert_eq!(second.error, None);
        assert_eq!(runner.calls(), 2);
    }

    #[tokio::test]
    async fn max_retries_three_means_four_attempts_then_failed() {
        let runner = Arc::new(FlakyRunner::new(usize::MAX));
        let (store, processor, id, user) = setup(runner.clone(), instant_retries()).await;

        for expected_retry in 1..=3 {
            let job = processor.tick().await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.retry_count, expected_retry);
        }
        let last = processor.tick().await.unwrap().unwrap();
        assert_eq!(last.status, JobStatus::Failed);
        assert_eq!(last.retry_count, 3);

        assert!(processor.tick().await.unwrap().is_none());
        assert_eq!(runner.calls(), 4);

        let stored = store.get_job(id, user).await.unwrap().unwrap();
        assert!(stored.retry_count <= stored.max_retries);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn fails_twice_then_completes_on_third_attempt() {
        let runner = Arc::new(FlakyRunner::new(2));
        let delay = Duration::from_millis(100);
        let config = instant_retries().with_retry_policy(RetryPolicy::fixed(3, delay));
        let (store, processor, id, user) = setup(runner.clone(), config).await;

        for expected_retry in 1..=2 {
            let job = processor.tick().await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.retry_count, expected_retry);
            let gate = job.next_attempt_at.unwrap();
            assert!(gate > Utc::now());

            // Not claimable until the gate passes.
            assert!(processor.tick().await.unwrap().is_none());
            assert_eq!(runner.calls(), expected_retry as usize);
            tokio::time::sleep(delay + Duration::from_millis(50)).await;
        }

        let done = processor.tick().await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.retry_count, 2);
        assert_eq!(done.error, None);
        assert_eq!(runner.calls(), 3);

        let stored = store.get_job(id, user).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.retry_count, 2);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn backoff_gate_defers_the_retry() {
        let runner = Arc::new(FlakyRunner::new(1));
        let config = instant_retries().with_retry_policy(RetryPolicy::fixed(3, Duration::from_secs(60)));
        let (_store, processor, _id, _user) = setup(runner.clone(), config).await;

        let failed = processor.tick().await.unwrap().unwrap();
        assert!(failed.next_attempt_at.is_some_and(|at| at > Utc::now()));
        assert!(processor.tick().await.unwrap().is_none());
        assert_eq!(runner.calls(), 1);
    }

    #[tokio::test]
    async fn timeout_routes_through_failure_path() {
        let runner = Arc::new(FlakyRunner::slow(Duration::from_millis(200)));
        let mut config = instant_retries();
        config.job_timeout = Duration::from_millis(20);
        let (_store, processor, _id, _user) = setup(runner, config).await;

        let job = processor.tick().await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.error.as_deref().is_some_and(|e| e.contains("timed out")));
    }

    #[tokio::test]
    async fn concurrent_processors_run_a_job_once() {
        let runner = Arc::new(FlakyRunner::slow(Duration::from_millis(30)));
        let (store, first, id, user) = setup(runner.clone(), instant_retries()).await;
        let second = JobProcessor::new(store.clone(), runner.clone(), instant_retries());

        let (a, b) = tokio::join!(first.tick(), second.tick());
        let ran = [a.unwrap(), b.unwrap()].into_iter().flatten().count();
        assert_eq!(ran, 1);
        assert_eq!(runner.calls(), 1);

        let err = first.execute_now(id, user).await.unwrap_err();
        assert!(matches!(err, ProcessorError::Store(JobStoreError::InvalidStateTransition { .. })));
    }

    #[tokio::test]
    async fn execute_now_is_user_scoped() {
        let runner = Arc::new(FlakyRunner::new(0));
        let (_store, processor, id, user) = setup(runner, instant_retries()).await;

        let err = processor.execute_now(id, UserId::new()).await.unwrap_err();
        assert!(matches!(err, ProcessorError::Store(JobStoreError::NotFound(_))));

        let job = processor.execute_now(id, user).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn dropped_execute_now_still_records_an_outcome() {
        let runner = Arc::new(FlakyRunner::slow(Duration::from_millis(200)));
        let (store, processor, id, user) = setup(runner.clone(), instant_retries()).await;

        let abandoned = tokio::time::timeout(Duration::from_millis(20), processor.execute_now(id, user)).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let job = store.get_job(id, user).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(runner.calls(), 1);
    }

    #[tokio::test]
    async fn sweep_requeues_stale_processing_jobs() {
        let runner = Arc::new(FlakyRunner::new(0));
        let (store, processor, id, user) = setup(runner, instant_retries()).await;
        store
            .claim(id, user, Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();

        let report = processor.sweep().await.unwrap();
        assert_eq!(report.requeued, 1);
        let job = store.get_job(id, user).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.error.as_deref(), Some(crate::jobs::store::INTERRUPTED));

        // The requeued job is picked up by the next tick.
        let done = processor.tick().await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn recover_requeues_interrupted_job() {
        let runner = Arc::new(FlakyRunner::new(0));
        let (store, processor, id, user) = setup(runner, instant_retries()).await;
        store
            .claim(id, user, Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(processor.recover().await.unwrap(), 1);
        let job = store.get_job(id, user).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
    }

    #[tokio::test]
    async fn spawned_processor_drains_queue_and_shuts_down() {
        let runner = Arc::new(FlakyRunner::new(0));
        let (store, processor, id, user) = setup(runner, instant_retries()).await;
        let handle = Arc::new(processor).spawn();

        let mut status = JobStatus::Pending;
        for _ in 0..100 {
            status = store.get_job(id, user).await.unwrap().unwrap().status;
            if status == JobStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(handle.stats().jobs_succeeded, 1);
        handle.shutdown().await;
    }
}
