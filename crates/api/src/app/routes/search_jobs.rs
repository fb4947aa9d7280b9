use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::info;

use prospector_core::JobId;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_job).get(list_jobs))
        .route("/stats", get(job_stats))
        .route("/:id", get(get_job).delete(cancel_job))
        .route("/:id/execute", post(execute_job))
}

pub async fn create_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Json(body): Json<dto::CreateSearchJobRequest>,
) -> axum::response::Response {
    let new_job = match body.into_new_job(user.user_id()) {
        Ok(job) => job,
        Err(resp) => return resp,
    };

    if let Err(e) = services.ensure_account(user.user_id()).await {
        return errors::ledger_error_to_response(e);
    }

    match services.jobs.create_job(new_job).await {
        Ok(job_id) => {
            info!(job_id = %job_id, user_id = %user.user_id(), "search job queued");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "job_id": job_id.to_string(), "status": "pending" })),
            )
                .into_response()
        }
        Err(e) => errors::job_store_error_to_response(e),
    }
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Query(query): Query<dto::ListQuery>,
) -> axum::response::Response {
    match services.jobs.list_jobs(user.user_id(), query.limit(20, 100)).await {
        Ok(jobs) => {
            let items = jobs.iter().map(dto::job_summary_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::job_store_error_to_response(e),
    }
}

pub async fn job_stats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    match services.jobs.stats(Some(user.user_id())).await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => errors::job_store_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.jobs.get_job(job_id, user.user_id()).await {
        Ok(Some(job)) => (StatusCode::OK, Json(dto::job_to_json(&job))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
        Err(e) => errors::job_store_error_to_response(e),
    }
}

pub async fn cancel_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.jobs.cancel_job(job_id, user.user_id()).await {
        Ok(()) => {
            info!(job_id = %job_id, "search job cancelled");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => errors::job_store_error_to_response(e),
    }
}

/// Run a pending job inline instead of waiting for the next poll.
pub async fn execute_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.processor.execute_now(job_id, user.user_id()).await {
        Ok(job) => (StatusCode::OK, Json(dto::job_to_json(&job))).into_response(),
        Err(e) => errors::processor_error_to_response(e),
    }
}

fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse::<JobId>()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"))
}
