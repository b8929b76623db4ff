//! Shared response envelope types for API handlers.
//!
//! All API responses use a `{ "data": ... }` envelope. Use
//! [`DataResponse`] instead of ad-hoc `serde_json::json!({ "data": ... })`.

use meshsmith_core::job::Job;
use meshsmith_core::types::TaskId;
use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// Payload returned when a provider task was started for a job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStarted {
    pub task_id: TaskId,
    /// `generating` for a preview, `refining` for a refine.
    pub status: &'static str,
    pub job: Job,
}
