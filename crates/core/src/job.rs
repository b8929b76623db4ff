//! The generation [`Job`] record, its stage/status enums, and the
//! conditional-write primitives ([`Precondition`], [`JobPatch`]) that every
//! store implementation shares.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, TaskId, Timestamp};

/// Defines a lifecycle enum persisted as a lowercase text column.
///
/// Each variant's string form is what the database stores and what the
/// API serializes, so the two can never drift apart.
macro_rules! define_text_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $val)] $variant ),+
        }

        impl $name {
            /// Return the persisted string form.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $val ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $val => Ok(Self::$variant), )+
                    other => Err(CoreError::Validation(format!(
                        "Unknown {} '{other}'",
                        stringify!($name),
                    ))),
                }
            }
        }
    };
}

define_text_enum! {
    /// Pipeline phase. Declaration order is the only allowed direction of
    /// travel: `Preview < Refining < Ready`.
    Stage {
        Preview = "preview",
        Refining = "refining",
        Ready = "ready",
    }
}

define_text_enum! {
    /// Status within the current stage. `Succeeded` is stage-relative.
    JobStatus {
        Pending = "pending",
        Generating = "generating",
        Succeeded = "succeeded",
        Failed = "failed",
        Cancelled = "cancelled",
    }
}

define_text_enum! {
    /// Whether a succeeded preview is the final asset or waits for refine.
    PipelineMode {
        SingleStage = "single_stage",
        TwoStage = "two_stage",
    }
}

impl Stage {
    fn rank(self) -> u8 {
        match self {
            Self::Preview => 0,
            Self::Refining => 1,
            Self::Ready => 2,
        }
    }
}

impl PartialOrd for Stage {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Stage {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl Default for PipelineMode {
    fn default() -> Self {
        Self::TwoStage
    }
}

/// A tracked request to generate a printable asset from text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub prompt: String,
    pub style: String,
    pub stage: Stage,
    pub status: JobStatus,
    /// Completion percentage of the active task (0-100).
    pub progress: i16,
    pub preview_task_id: Option<TaskId>,
    pub refine_task_id: Option<TaskId>,
    pub thumbnail_url: Option<String>,
    pub model_url: Option<String>,
    pub error: Option<String>,
    /// Bumped on every successful write.
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Input for creating a job. The preview task is submitted before the
/// job row exists, so its id is recorded atomically with creation.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub prompt: String,
    pub style: String,
    pub preview_task_id: TaskId,
}

impl Job {
    /// Build the initial record: `preview` / `generating` at 0%.
    pub fn new(input: NewJob) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::now_v7(),
            prompt: input.prompt,
            style: input.style,
            stage: Stage::Preview,
            status: JobStatus::Generating,
            progress: 0,
            preview_task_id: Some(input.preview_task_id),
            refine_task_id: None,
            thumbnail_url: None,
            model_url: None,
            error: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// The task whose status currently drives this job.
    ///
    /// A `ready` job without a refine task came out of the single-stage
    /// pipeline, so its preview task produced the final asset.
    pub fn active_task_id(&self) -> Option<&str> {
        match self.stage {
            Stage::Preview => self.preview_task_id.as_deref(),
            Stage::Refining => self.refine_task_id.as_deref(),
            Stage::Ready => self
                .refine_task_id
                .as_deref()
                .or(self.preview_task_id.as_deref()),
        }
    }

    /// `ready`, `failed`, and `cancelled` jobs never change again.
    pub fn is_terminal(&self) -> bool {
        self.stage == Stage::Ready
            || matches!(self.status, JobStatus::Failed | JobStatus::Cancelled)
    }

    /// True while a provider task is running and should be polled.
    pub fn is_generating(&self) -> bool {
        self.status == JobStatus::Generating
    }
}

/// Expected current state supplied with a conditional update.
///
/// Every `Some` field must match the stored job or the write is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Precondition {
    pub stage: Option<Stage>,
    pub status: Option<JobStatus>,
    pub active_task_id: Option<TaskId>,
    /// Stored progress must be strictly below this value.
    pub progress_below: Option<i16>,
}

impl Precondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn active_task(mut self, task_id: impl Into<TaskId>) -> Self {
        self.active_task_id = Some(task_id.into());
        self
    }

    pub fn progress_below(mut self, progress: i16) -> Self {
        self.progress_below = Some(progress);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.stage.map_or(true, |s| s == job.stage)
            && self.status.map_or(true, |s| s == job.status)
            && self
                .active_task_id
                .as_deref()
                .map_or(true, |t| job.active_task_id() == Some(t))
            && self.progress_below.map_or(true, |p| job.progress < p)
    }
}

/// A partial update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobPatch {
    pub stage: Option<Stage>,
    pub status: Option<JobStatus>,
    pub progress: Option<i16>,
    pub refine_task_id: Option<TaskId>,
    pub thumbnail_url: Option<String>,
    pub model_url: Option<String>,
    /// `Some(None)` clears the error.
    pub error: Option<Option<String>>,
}

impl JobPatch {
    /// Apply the patch in place, enforcing the record-level invariants:
    /// the stage never regresses and the refine task id is set at most once.
    pub fn apply(&self, job: &mut Job) -> Result<(), CoreError> {
        if let Some(stage) = self.stage {
            if stage < job.stage {
                return Err(CoreError::InvalidTransition(format!(
                    "stage cannot move from {} back to {stage}",
                    job.stage
                )));
            }
        }
        if let (Some(existing), Some(new)) = (&job.refine_task_id, &self.refine_task_id) {
            if existing != new {
                return Err(CoreError::InvalidTransition(format!(
                    "refine task already set to {existing}"
                )));
            }
        }

        if let Some(stage) = self.stage {
            job.stage = stage;
        }
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(progress) = self.progress {
            job.progress = progress.clamp(0, 100);
        }
        if let Some(task_id) = &self.refine_task_id {
            job.refine_task_id = Some(task_id.clone());
        }
        if let Some(url) = &self.thumbnail_url {
            job.thumbnail_url = Some(url.clone());
        }
        if let Some(url) = &self.model_url {
            job.model_url = Some(url.clone());
        }
        if let Some(error) = &self.error {
            job.error = error.clone();
        }
        job.version += 1;
        job.updated_at = chrono::Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn preview_job() -> Job {
        Job::new(NewJob {
            prompt: "a small owl".into(),
            style: "cartoon".into(),
            preview_task_id: "task-a".into(),
        })
    }

    #[test]
    fn stage_order_is_preview_refining_ready() {
        assert!(Stage::Preview < Stage::Refining);
        assert!(Stage::Refining < Stage::Ready);
    }

    #[test]
    fn text_forms_round_trip() {
        for stage in [Stage::Preview, Stage::Refining, Stage::Ready] {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert_eq!("cancelled".parse::<JobStatus>().unwrap(), JobStatus::Cancelled);
        assert_matches!("done".parse::<JobStatus>(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn new_job_starts_generating_preview() {
        let job = preview_job();
        assert_eq!(job.stage, Stage::Preview);
        assert_eq!(job.status, JobStatus::Generating);
        assert_eq!(job.progress, 0);
        assert_eq!(job.active_task_id(), Some("task-a"));
        assert!(!job.is_terminal());
    }

    #[test]
    fn active_task_follows_stage() {
        let mut job = preview_job();
        job.stage = Stage::Refining;
        assert_eq!(job.active_task_id(), None);
        job.refine_task_id = Some("task-b".into());
        assert_eq!(job.active_task_id(), Some("task-b"));
        job.stage = Stage::Ready;
        assert_eq!(job.active_task_id(), Some("task-b"));
    }

    #[test]
    fn single_stage_ready_job_is_driven_by_preview_task() {
        let mut job = preview_job();
        job.stage = Stage::Ready;
        job.status = JobStatus::Succeeded;
        assert_eq!(job.active_task_id(), Some("task-a"));
        assert!(job.is_terminal());
    }

    #[test]
    fn precondition_checks_every_supplied_field() {
        let job = preview_job();
        assert!(Precondition::new().matches(&job));
        assert!(Precondition::new()
            .stage(Stage::Preview)
            .status(JobStatus::Generating)
            .active_task("task-a")
            .matches(&job));
        assert!(!Precondition::new().status(JobStatus::Succeeded).matches(&job));
        assert!(!Precondition::new().active_task("task-z").matches(&job));
        assert!(Precondition::new().progress_below(1).matches(&job));
        assert!(!Precondition::new().progress_below(0).matches(&job));
    }

    #[test]
    fn patch_rejects_stage_regression() {
        let mut job = preview_job();
        job.stage = Stage::Ready;
        let patch = JobPatch {
            stage: Some(Stage::Preview),
            ..Default::default()
        };
        assert_matches!(patch.apply(&mut job), Err(CoreError::InvalidTransition(_)));
        assert_eq!(job.stage, Stage::Ready);
    }

    #[test]
    fn patch_rejects_second_refine_task() {
        let mut job = preview_job();
        job.refine_task_id = Some("task-b".into());
        let patch = JobPatch {
            refine_task_id: Some("task-c".into()),
            ..Default::default()
        };
        assert_matches!(patch.apply(&mut job), Err(CoreError::InvalidTransition(_)));
    }

    #[test]
    fn patch_bumps_version_and_clamps_progress() {
        let mut job = preview_job();
        let patch = JobPatch {
            progress: Some(140),
            error: Some(Some("boom".into())),
            ..Default::default()
        };
        patch.apply(&mut job).unwrap();
        assert_eq!(job.progress, 100);
        assert_eq!(job.version, 2);
        assert_eq!(job.error.as_deref(), Some("boom"));

        let clear = JobPatch {
            error: Some(None),
            ..Default::default()
        };
        clear.apply(&mut job).unwrap();
        assert_eq!(job.error, None);
    }

    #[test]
    fn job_serializes_camel_case() {
        let json = serde_json::to_value(preview_job()).unwrap();
        assert_eq!(json["stage"], "preview");
        assert_eq!(json["status"], "generating");
        assert_eq!(json["previewTaskId"], "task-a");
        assert!(json["refineTaskId"].is_null());
    }
}
