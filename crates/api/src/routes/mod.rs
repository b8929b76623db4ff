pub mod health;
pub mod jobs;
pub mod tasks;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /jobs                          list, create
/// /jobs/{id}                     get, delete
/// /jobs/{id}/refine              start refine (POST)
/// /jobs/{id}/cancel              cancel (POST)
///
/// /tasks/{task_id}               provider task status
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/tasks", tasks::router())
}
