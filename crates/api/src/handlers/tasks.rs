//! Handlers for the `/tasks` resource.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/tasks/{task_id}
///
/// Current provider snapshot for a task. An id the provider does not know
/// is a 404, never a pending task.
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let snapshot = state.service.query_task(&task_id).await?;
    Ok(Json(DataResponse { data: snapshot }))
}
