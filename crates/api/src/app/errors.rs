use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use prospector_enrichment::{BillingError, EnrichmentError, LedgerError, StoreError};
use prospector_infra::jobs::{JobStoreError, ProcessorError};

pub fn job_store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
        JobStoreError::InvalidStateTransition { from, to } => json_error(
            StatusCode::CONFLICT,
            "invalid_state",
            format!("job is {from}; cannot move to {to}"),
        ),
        JobStoreError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        JobStoreError::Storage(msg) => internal("store_error", msg),
    }
}

pub fn processor_error_to_response(err: ProcessorError) -> axum::response::Response {
    match err {
        ProcessorError::Store(e) => job_store_error_to_response(e),
        ProcessorError::Task(msg) => internal("execution_error", msg),
    }
}

pub fn enrichment_error_to_response(err: EnrichmentError) -> axum::response::Response {
    match err {
        EnrichmentError::Billing(BillingError::InsufficientCredits { balance, required }) => json_error(
            StatusCode::PAYMENT_REQUIRED,
            "insufficient_credits",
            format!("balance {balance} is below the required {required}"),
        ),
        EnrichmentError::Billing(BillingError::Ledger(e)) => ledger_error_to_response(e),
        EnrichmentError::Store(StoreError::NotFound) => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        EnrichmentError::Store(e) => internal("store_error", e.to_string()),
        EnrichmentError::Systemic(msg) => json_error(StatusCode::SERVICE_UNAVAILABLE, "enrichment_unavailable", msg),
    }
}

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    internal("ledger_error", err.to_string())
}

fn internal(code: &'static str, message: String) -> axum::response::Response {
    tracing::error!(error = %message, code, "request failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, code, message)
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
