use serde::Deserialize;
use serde_json::json;

use prospector_enrichment::{ContactSearchConfig, SearchType};
use prospector_infra::jobs::{JobSource, NewSearchJob, SearchJob};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateSearchJobRequest {
    pub query: String,
    #[serde(default)]
    pub search_type: Option<String>,
    #[serde(default)]
    pub contact_search_config: Option<ContactSearchConfig>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl CreateSearchJobRequest {
    pub fn into_new_job(self, user_id: prospector_core::UserId) -> Result<NewSearchJob, axum::response::Response> {
        let search_type = match self.search_type.as_deref() {
            None => SearchType::Companies,
            Some(raw) => SearchType::parse(raw).map_err(|e| {
                errors::json_error(axum::http::StatusCode::BAD_REQUEST, "validation_error", e.to_string())
            })?,
        };
        let source = match self.source.as_deref() {
            None => JobSource::Api,
            Some(raw) => raw.parse::<JobSource>().map_err(|e| {
                errors::json_error(axum::http::StatusCode::BAD_REQUEST, "validation_error", e.to_string())
            })?,
        };

        let mut job = NewSearchJob::new(user_id, self.query, search_type);
        job.contact_config = self.contact_search_config.unwrap_or_default();
        job.source = source;
        job.priority = self.priority.unwrap_or(0);
        job.max_retries = self.max_retries;
        job.session_id = self.session_id.filter(|s| !s.trim().is_empty());
        Ok(job)
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn limit(&self, default: usize, max: usize) -> usize {
        self.limit.unwrap_or(default).clamp(1, max)
    }
}

// -------------------------
// Response mapping
// -------------------------

pub fn job_to_json(job: &SearchJob) -> serde_json::Value {
    json!({
        "job_id": job.id.to_string(),
        "status": job.status.as_str(),
        "query": job.query,
        "search_type": job.search_type.as_str(),
        "contact_search_config": job.contact_config,
        "progress": job.progress,
        "results": job.results,
        "result_count": job.result_count,
        "error": job.error,
        "source": job.source.as_str(),
        "priority": job.priority,
        "retry_count": job.retry_count,
        "max_retries": job.max_retries,
        "next_attempt_at": job.next_attempt_at,
        "session_id": job.session_id,
        "created_at": job.created_at,
        "started_at": job.started_at,
        "completed_at": job.completed_at,
        "expires_at": job.expires_at,
    })
}

/// Compact form for listings; omits the results payload.
pub fn job_summary_to_json(job: &SearchJob) -> serde_json::Value {
    json!({
        "job_id": job.id.to_string(),
        "status": job.status.as_str(),
        "query": job.query,
        "search_type": job.search_type.as_str(),
        "progress": job.progress,
        "result_count": job.result_count,
        "error": job.error,
        "retry_count": job.retry_count,
        "created_at": job.created_at,
        "completed_at": job.completed_at,
    })
}
