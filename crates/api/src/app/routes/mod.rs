use axum::Router;

pub mod contacts;
pub mod credits;
pub mod search_jobs;
pub mod system;

/// Router for all authenticated (user-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", axum::routing::get(system::whoami))
        .nest("/search-jobs", search_jobs::router())
        .nest("/contacts", contacts::router())
        .nest("/credits", credits::router())
}
