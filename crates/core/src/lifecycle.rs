//! The job transition table.
//!
//! Every state change a job can undergo is computed here as a
//! [`Transition`]: the patch to apply plus the precondition the stored job
//! must still satisfy at write time. Callers hand both to the store's
//! conditional update, which is what makes replays and out-of-order
//! deliveries harmless.
//!
//! ```text
//! preview(generating) -> preview(succeeded) -> refining(generating) -> ready(succeeded)
//!          |                                          |
//!          +-> failed                                 +-> failed
//! any non-terminal -> cancelled
//! ```

use crate::error::CoreError;
use crate::job::{Job, JobPatch, JobStatus, PipelineMode, Precondition, Stage};
use crate::task::{TaskSnapshot, TaskStatus};

/// Error recorded when the provider reports failure without a message.
pub const DEFAULT_FAILURE_MESSAGE: &str = "generation failed";

/// Highest progress a non-terminal job may show.
pub const MAX_PENDING_PROGRESS: i16 = 99;

/// A planned conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub patch: JobPatch,
    pub precondition: Precondition,
}

/// Why a provider snapshot produced no write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// The snapshot is for a task that no longer drives the job.
    StaleTask,
    /// The job is not generating (already applied, cancelled, or terminal).
    NotGenerating,
    /// Progress did not advance.
    NoProgress,
}

/// Plan the merge of a provider snapshot into `job`.
pub fn plan_reconcile(
    job: &Job,
    snapshot: &TaskSnapshot,
    mode: PipelineMode,
) -> Result<Transition, Skip> {
    let task_id = guard_active(job, &snapshot.task_id)?;
    let mut precondition = Precondition::new()
        .stage(job.stage)
        .status(JobStatus::Generating)
        .active_task(task_id);

    let patch = match snapshot.status {
        TaskStatus::Pending => {
            let reported = snapshot.progress.clamp(0, MAX_PENDING_PROGRESS);
            if reported <= job.progress {
                return Err(Skip::NoProgress);
            }
            // Checked again at write time: a concurrent merge may have
            // raised progress since `job` was read.
            precondition = precondition.progress_below(reported);
            JobPatch {
                progress: Some(reported),
                ..Default::default()
            }
        }
        TaskStatus::Succeeded => match (&snapshot.model_url, &snapshot.thumbnail_url) {
            (Some(model_url), thumbnail_url) => JobPatch {
                stage: next_stage_on_success(job.stage, mode),
                status: Some(JobStatus::Succeeded),
                progress: Some(100),
                model_url: Some(model_url.clone()),
                thumbnail_url: thumbnail_url.clone(),
                error: Some(None),
                ..Default::default()
            },
            (None, _) => failure_patch(Some(
                "provider reported success without a model URL".into(),
            )),
        },
        TaskStatus::Failed => failure_patch(snapshot.error.clone()),
    };

    Ok(Transition {
        patch,
        precondition,
    })
}

/// Plan a failure that did not come from the provider's own report, such
/// as a poll timeout or a task the provider no longer recognises.
pub fn plan_force_fail(job: &Job, task_id: &str, message: &str) -> Result<Transition, Skip> {
    let task_id = guard_active(job, task_id)?;
    Ok(Transition {
        patch: failure_patch(Some(message.to_string())),
        precondition: Precondition::new()
            .stage(job.stage)
            .status(JobStatus::Generating)
            .active_task(task_id),
    })
}

/// Check that a refine may be requested and return the preview task id.
pub fn validate_refine(job: &Job, mode: PipelineMode) -> Result<&str, CoreError> {
    if mode == PipelineMode::SingleStage {
        return Err(CoreError::Validation(
            "Refine is disabled in the single-stage pipeline".into(),
        ));
    }
    if job.stage != Stage::Preview || job.status != JobStatus::Succeeded {
        return Err(CoreError::Validation(format!(
            "Refine requires a succeeded preview, job is {} ({})",
            job.stage, job.status
        )));
    }
    job.preview_task_id
        .as_deref()
        .ok_or_else(|| CoreError::Validation("Job has no preview task".into()))
}

/// Plan the stage advance after a refine task was accepted.
pub fn plan_refine_started(job: &Job, refine_task_id: &str) -> Transition {
    let mut precondition = Precondition::new()
        .stage(Stage::Preview)
        .status(JobStatus::Succeeded);
    if let Some(preview) = &job.preview_task_id {
        precondition = precondition.active_task(preview.clone());
    }
    Transition {
        patch: JobPatch {
            stage: Some(Stage::Refining),
            status: Some(JobStatus::Generating),
            progress: Some(0),
            refine_task_id: Some(refine_task_id.to_string()),
            error: Some(None),
            ..Default::default()
        },
        precondition,
    }
}

/// Plan a cancellation. Only non-terminal jobs can be cancelled.
pub fn plan_cancel(job: &Job) -> Result<Transition, CoreError> {
    if job.is_terminal() {
        return Err(CoreError::Conflict(format!(
            "Job is already {} and cannot be cancelled",
            if job.stage == Stage::Ready {
                "ready"
            } else {
                job.status.as_str()
            }
        )));
    }
    Ok(Transition {
        patch: JobPatch {
            status: Some(JobStatus::Cancelled),
            ..Default::default()
        },
        precondition: Precondition::new().stage(job.stage).status(job.status),
    })
}

fn guard_active<'a>(job: &Job, task_id: &'a str) -> Result<&'a str, Skip> {
    if job.active_task_id() != Some(task_id) {
        return Err(Skip::StaleTask);
    }
    if job.status != JobStatus::Generating {
        return Err(Skip::NotGenerating);
    }
    Ok(task_id)
}

fn next_stage_on_success(stage: Stage, mode: PipelineMode) -> Option<Stage> {
    match (stage, mode) {
        (Stage::Preview, PipelineMode::TwoStage) => None,
        (Stage::Preview, PipelineMode::SingleStage) | (Stage::Refining, _) => Some(Stage::Ready),
        (Stage::Ready, _) => None,
    }
}

fn failure_patch(error: Option<String>) -> JobPatch {
    JobPatch {
        status: Some(JobStatus::Failed),
        error: Some(Some(
            error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
        )),
        ..Default::default()
    }
}
