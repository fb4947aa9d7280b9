use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new().route("/", get(get_credits))
}

pub async fn get_credits(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Query(query): Query<dto::ListQuery>,
) -> axum::response::Response {
    let user_id = user.user_id();
    if let Err(e) = services.ensure_account(user_id).await {
        return errors::ledger_error_to_response(e);
    }

    let balance = match services.ledger.get_balance(user_id).await {
        Ok(balance) => balance,
        Err(e) => return errors::ledger_error_to_response(e),
    };
    match services.ledger.entries(user_id, query.limit(20, 200)).await {
        Ok(entries) => (
            StatusCode::OK,
            Json(serde_json::json!({ "balance": balance, "entries": entries })),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
