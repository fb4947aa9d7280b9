//! Bridge between the job processor and the search pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use prospector_enrichment::{EnrichmentError, ProgressSink, SearchPipeline, SearchProgress};

use super::store::JobStore;
use super::types::{JobId, SearchJob};

/// What a successful run writes onto the job row.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
    pub results: serde_json::Value,
    pub result_count: u32,
}

/// Executes the work behind one claimed job.
#[async_trait]
pub trait SearchJobRunner: Send + Sync {
    async fn run(&self, job: &SearchJob, progress: &dyn ProgressSink) -> Result<JobOutput, EnrichmentError>;
}

/// Runs jobs through the enrichment [`SearchPipeline`].
pub struct PipelineRunner {
    pipeline: Arc<SearchPipeline>,
}

impl PipelineRunner {
    pub fn new(pipeline: Arc<SearchPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl SearchJobRunner for PipelineRunner {
    async fn run(&self, job: &SearchJob, progress: &dyn ProgressSink) -> Result<JobOutput, EnrichmentError> {
        let results = self.pipeline.run(&job.to_request(), progress).await?;
        let result_count = u32::try_from(results.result_count()).unwrap_or(u32::MAX);
        let results = serde_json::to_value(&results)
            .map_err(|e| EnrichmentError::systemic(format!("failed to encode results: {e}")))?;
        Ok(JobOutput { results, result_count })
    }
}

/// Writes pipeline progress onto the job row.
///
/// Progress is best-effort: a failed write is logged and the run continues.
pub struct StoreProgress {
    store: Arc<dyn JobStore>,
    job_id: JobId,
}

impl StoreProgress {
    pub fn new(store: Arc<dyn JobStore>, job_id: JobId) -> Self {
        Self { store, job_id }
    }
}

#[async_trait]
impl ProgressSink for StoreProgress {
    async fn report(&self, progress: SearchProgress) {
        if let Err(e) = self.store.update_progress(self.job_id, progress.into()).await {
            warn!(job_id = %self.job_id, error = %e, "failed to record job progress");
        }
    }
}
