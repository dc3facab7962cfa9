pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /jobs                    list, submit
/// /jobs/upload             multipart submit
/// /jobs/{id}               get, update (runner/admin), delete
/// /jobs/{id}/download      stream output artifact
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/jobs", jobs::router())
}
