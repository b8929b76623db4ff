//! Provider task snapshots as seen by the lifecycle rules.

use serde::{Deserialize, Serialize};

use crate::types::TaskId;

/// Provider task status, collapsed to what reconciliation cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Last-known state of a provider task. Also the wire shape of
/// `GET /api/v1/tasks/{task_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// 0-100. Only a succeeded task reports 100.
    pub progress: i16,
    pub model_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error: Option<String>,
}

impl TaskSnapshot {
    pub fn pending(task_id: impl Into<TaskId>, progress: i16) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            progress,
            model_url: None,
            thumbnail_url: None,
            error: None,
        }
    }

    pub fn succeeded(
        task_id: impl Into<TaskId>,
        model_url: impl Into<String>,
        thumbnail_url: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Succeeded,
            progress: 100,
            model_url: Some(model_url.into()),
            thumbnail_url: Some(thumbnail_url.into()),
            error: None,
        }
    }

    pub fn failed(task_id: impl Into<TaskId>, error: Option<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            progress: 0,
            model_url: None,
            thumbnail_url: None,
            error,
        }
    }
}
