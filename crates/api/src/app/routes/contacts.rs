use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use prospector_core::ContactId;
use prospector_enrichment::EnrichmentOutcome;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new().route("/:id/enrich", post(enrich_contact))
}

/// Run the email waterfall for one stored contact and bill the result.
pub async fn enrich_contact(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Ok(contact_id) = id.parse::<ContactId>() else {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid contact id");
    };

    if let Err(e) = services.ensure_account(user.user_id()).await {
        return errors::ledger_error_to_response(e);
    }

    match services.pipeline.enrich_single(user.user_id(), contact_id).await {
        Ok(single) if single.outcome == EnrichmentOutcome::TargetNotFound => {
            errors::json_error(StatusCode::NOT_FOUND, "not_found", "contact not found")
        }
        Ok(single) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "contact_id": contact_id.to_string(),
                "outcome": single.outcome,
                "settlement": single.settlement,
                "contact": single.contact,
            })),
        )
            .into_response(),
        Err(e) => errors::enrichment_error_to_response(e),
    }
}
