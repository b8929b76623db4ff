//! Status Reconciler: merges provider snapshots into jobs.
//!
//! A snapshot is matched to the job whose *active* task it describes.
//! Snapshots for superseded tasks, replays of already-applied results and
//! writes that lose a race against another writer are all discarded
//! without touching the store.

use std::sync::Arc;

use meshsmith_core::job::{Job, PipelineMode};
use meshsmith_core::lifecycle::{self, Skip, Transition};
use meshsmith_core::task::TaskSnapshot;
use meshsmith_db::{JobStore, StoreError};

use crate::PipelineError;

/// Why a reconcile attempt wrote nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// No job currently has this task as its active task.
    NoActiveJob,
    /// The lifecycle rules had nothing to apply.
    Skipped(Skip),
    /// Another writer changed the job between read and write.
    PreconditionLost,
}

/// Result of one reconcile attempt.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    Applied(Job),
    Discarded {
        reason: DiscardReason,
        /// Latest known state of the job, if one still claims the task.
        job: Option<Job>,
    },
}

impl ReconcileOutcome {
    pub fn job(&self) -> Option<&Job> {
        match self {
            Self::Applied(job) => Some(job),
            Self::Discarded { job, .. } => job.as_ref(),
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// Whether `task_id` still drives a generating job, i.e. whether a
    /// poller for it has more work to do.
    pub fn keeps_polling(&self, task_id: &str) -> bool {
        self.job()
            .is_some_and(|job| job.is_generating() && job.active_task_id() == Some(task_id))
    }
}

pub struct StatusReconciler {
    store: Arc<dyn JobStore>,
    mode: PipelineMode,
}

impl StatusReconciler {
    pub fn new(store: Arc<dyn JobStore>, mode: PipelineMode) -> Self {
        Self { store, mode }
    }

    /// Merge `snapshot` into the job whose active task is
    /// `snapshot.task_id`.
    pub async fn reconcile(&self, snapshot: &TaskSnapshot) -> Result<ReconcileOutcome, PipelineError> {
        let task_id = snapshot.task_id.as_str();
        let Some(job) = self.store.find_by_active_task(task_id).await? else {
            tracing::debug!(task_id = %task_id, "No job for task; snapshot discarded");
            return Ok(ReconcileOutcome::Discarded {
                reason: DiscardReason::NoActiveJob,
                job: None,
            });
        };

        let planned = lifecycle::plan_reconcile(&job, snapshot, self.mode);
        self.commit(job, task_id, planned).await
    }

    /// Fail the job driven by `task_id` for a reason the provider did not
    /// report itself (poll timeout, task unknown to the provider).
    pub async fn force_fail(&self, task_id: &str, message: &str) -> Result<ReconcileOutcome, PipelineError> {
        let Some(job) = self.store.find_by_active_task(task_id).await? else {
            return Ok(ReconcileOutcome::Discarded {
                reason: DiscardReason::NoActiveJob,
                job: None,
            });
        };

        let planned = lifecycle::plan_force_fail(&job, task_id, message);
        self.commit(job, task_id, planned).await
    }

    async fn commit(
        &self,
        job: Job,
        task_id: &str,
        planned: Result<Transition, Skip>,
    ) -> Result<ReconcileOutcome, PipelineError> {
        let transition = match planned {
            Ok(transition) => transition,
            Err(skip) => {
                tracing::trace!(job_id = %job.id, task_id = %task_id, ?skip, "Snapshot skipped");
                return Ok(ReconcileOutcome::Discarded {
                    reason: DiscardReason::Skipped(skip),
                    job: Some(job),
                });
            }
        };

        match self
            .store
            .update(job.id, &transition.patch, &transition.precondition)
            .await
        {
            Ok(updated) => {
                tracing::info!(
                    job_id = %updated.id,
                    task_id = %task_id,
                    stage = %updated.stage,
                    status = %updated.status,
                    progress = updated.progress,
                    "Job reconciled",
                );
                if let Some(error) = &updated.error {
                    tracing::warn!(job_id = %updated.id, error = %error, "Job failed");
                }
                Ok(ReconcileOutcome::Applied(updated))
            }
            Err(StoreError::PreconditionFailed { current, .. }) => {
                tracing::debug!(
                    job_id = %job.id,
                    task_id = %task_id,
                    stage = %current.stage,
                    status = %current.status,
                    "Job changed concurrently; snapshot discarded",
                );
                Ok(ReconcileOutcome::Discarded {
                    reason: DiscardReason::PreconditionLost,
                    job: Some(*current),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}
