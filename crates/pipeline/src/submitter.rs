//! Task Submitter: starts provider tasks and records them on jobs.
//!
//! A submission that the provider rejects never touches the store, so a
//! failed preview creates no job and a failed refine leaves the job in
//! `preview` / `succeeded`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use meshsmith_core::error::CoreError;
use meshsmith_core::job::{Job, NewJob, PipelineMode};
use meshsmith_core::lifecycle;
use meshsmith_core::prompt;
use meshsmith_core::types::{JobId, TaskId};
use meshsmith_db::{JobStore, StoreError};
use meshsmith_provider::{PreviewRequest, ProviderClient, RefineRequest};

use crate::PipelineError;

/// Default mesh density requested for previews.
pub const DEFAULT_TARGET_POLYCOUNT: u32 = 50_000;

#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    pub mode: PipelineMode,
    pub target_polycount: u32,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::default(),
            target_polycount: DEFAULT_TARGET_POLYCOUNT,
        }
    }
}

pub struct TaskSubmitter {
    store: Arc<dyn JobStore>,
    provider: Arc<dyn ProviderClient>,
    config: SubmitterConfig,
    /// Jobs with a refine submission in flight.
    refining: Mutex<HashSet<JobId>>,
}

/// Removes the job from the in-flight set when the refine attempt ends,
/// whichever way it ends.
struct RefineSlot<'a> {
    set: &'a Mutex<HashSet<JobId>>,
    job_id: JobId,
}

impl Drop for RefineSlot<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

impl TaskSubmitter {
    pub fn new(
        store: Arc<dyn JobStore>,
        provider: Arc<dyn ProviderClient>,
        config: SubmitterConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
            refining: Mutex::new(HashSet::new()),
        }
    }

    pub fn mode(&self) -> PipelineMode {
        self.config.mode
    }

    /// Submit a preview task and create the job that tracks it.
    ///
    /// The stored prompt is the user's text; the provider receives it with
    /// the printability qualifiers appended.
    pub async fn start_preview(
        &self,
        prompt: &str,
        style: Option<&str>,
    ) -> Result<(TaskId, Job), PipelineError> {
        let prompt = prompt::validate_prompt(prompt)?;
        let style = prompt::validate_style(style)?;

        let request = PreviewRequest {
            prompt: prompt::enhance_prompt(prompt),
            style: style.to_string(),
            target_polycount: self.config.target_polycount,
            a_pose: prompt::wants_a_pose(prompt),
        };
        let task_id = self.provider.submit_preview(&request).await.map_err(|e| {
            tracing::warn!(error = %e, "Preview submission rejected");
            e
        })?;

        let job = self
            .store
            .create(NewJob {
                prompt: prompt.to_string(),
                style: style.to_string(),
                preview_task_id: task_id.clone(),
            })
            .await?;

        tracing::info!(
            job_id = %job.id,
            task_id = %task_id,
            style,
            a_pose = request.a_pose,
            "Preview task submitted",
        );
        Ok((task_id, job))
    }

    /// Submit a refine task for a job whose preview succeeded, then advance
    /// the job to `refining`.
    pub async fn start_refine(
        &self,
        job_id: JobId,
        texture_prompt: Option<String>,
    ) -> Result<(TaskId, Job), PipelineError> {
        let _slot = self.claim_refine(job_id)?;

        let job = self.store.get(job_id).await?;
        let preview_task_id = lifecycle::validate_refine(&job, self.config.mode)?.to_string();

        let request = RefineRequest {
            preview_task_id,
            texture_prompt: texture_prompt.filter(|t| !t.trim().is_empty()),
        };
        let task_id = self.provider.submit_refine(&request).await.map_err(|e| {
            tracing::warn!(job_id = %job_id, error = %e, "Refine submission rejected");
            e
        })?;

        let transition = lifecycle::plan_refine_started(&job, &task_id);
        let job = self
            .store
            .update(job_id, &transition.patch, &transition.precondition)
            .await
            .map_err(|e| match e {
                StoreError::PreconditionFailed { current, .. } => {
                    tracing::warn!(
                        job_id = %job_id,
                        task_id = %task_id,
                        stage = %current.stage,
                        status = %current.status,
                        "Job moved on while refine was submitted; refine task orphaned",
                    );
                    PipelineError::Core(CoreError::Conflict(format!(
                        "Job changed to {} ({}) during refine submission",
                        current.stage, current.status
                    )))
                }
                other => other.into(),
            })?;

        tracing::info!(
            job_id = %job_id,
            task_id = %task_id,
            preview_task_id = %request.preview_task_id,
            "Refine task submitted",
        );
        Ok((task_id, job))
    }

    /// Mark a non-terminal job cancelled. Provider tasks keep running.
    pub async fn cancel(&self, job_id: JobId) -> Result<Job, PipelineError> {
        let job = self.store.get(job_id).await?;
        let transition = lifecycle::plan_cancel(&job)?;
        let job = self
            .store
            .update(job_id, &transition.patch, &transition.precondition)
            .await
            .map_err(|e| match e {
                StoreError::PreconditionFailed { current, .. } => {
                    PipelineError::Core(CoreError::Conflict(format!(
                        "Job changed to {} ({}) before it could be cancelled",
                        current.stage, current.status
                    )))
                }
                other => other.into(),
            })?;

        tracing::info!(job_id = %job_id, stage = %job.stage, "Job cancelled");
        Ok(job)
    }

    fn claim_refine(&self, job_id: JobId) -> Result<RefineSlot<'_>, CoreError> {
        let mut in_flight = self
            .refining
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(job_id) {
            return Err(CoreError::Conflict(format!(
                "A refine for job {job_id} is already being submitted"
            )));
        }
        Ok(RefineSlot {
            set: &self.refining,
            job_id,
        })
    }
}
