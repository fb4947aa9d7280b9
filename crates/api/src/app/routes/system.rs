use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::services::AppServices;
use crate::context::UserContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> impl IntoResponse {
    let processor = services.processor.stats();
    Json(serde_json::json!({
        "user_id": user.user_id().to_string(),
        "processor": {
            "name": services.processor.config().name,
            "current_running": processor.current_running,
            "uptime_secs": processor.uptime_secs,
        },
    }))
}
