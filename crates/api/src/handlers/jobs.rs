//! Handlers for the `/jobs` resource.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use meshsmith_core::types::JobId;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::response::{DataResponse, TaskStarted};
use crate::state::AppState;

/// Body of `POST /api/v1/jobs`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub prompt: String,
    pub style: Option<String>,
}

/// Body of `POST /api/v1/jobs/{id}/refine`. The body itself is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefineJobRequest {
    pub texture_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Submit a preview task and create its job. Returns 201 with the task id
/// and the new job, already being polled.
pub async fn create_job(
    State(state): State<AppState>,
    Json(input): Json<CreateJobRequest>,
) -> AppResult<impl IntoResponse> {
    let (task_id, job) = state
        .service
        .submit(&input.prompt, input.style.as_deref())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: TaskStarted {
                task_id,
                status: "generating",
                job,
            },
        }),
    ))
}

// ---------------------------------------------------------------------------
// List / get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// Newest first. `limit` defaults to 50 and is capped at 100.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsQuery>,
) -> AppResult<impl IntoResponse> {
    let jobs = state.service.list(params.limit).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.service.get(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Refine / cancel / delete
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/refine
///
/// Start the texture pass for a job whose preview succeeded.
pub async fn refine_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let input = if body.is_empty() {
        RefineJobRequest::default()
    } else {
        serde_json::from_slice::<RefineJobRequest>(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid refine request: {e}")))?
    };

    let (task_id, job) = state.service.refine(job_id, input.texture_prompt).await?;

    Ok(Json(DataResponse {
        data: TaskStarted {
            task_id,
            status: "refining",
            job,
        },
    }))
}

/// POST /api/v1/jobs/{id}/cancel
///
/// Stop tracking a job that has not finished. Returns 409 for a job that
/// already reached a terminal state.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.service.cancel(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// DELETE /api/v1/jobs/{id}
///
/// Stops the job's poller before removing it.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<StatusCode> {
    state.service.delete(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
