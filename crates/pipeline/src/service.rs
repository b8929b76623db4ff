//! Facade tying the submitter, reconciler and poller registry together.
//!
//! Every submission that yields a new active task starts (or replaces) the
//! job's poller; cancel and delete stop it before touching the store.

use std::sync::Arc;

use meshsmith_core::error::CoreError;
use meshsmith_core::job::{Job, PipelineMode};
use meshsmith_core::task::TaskSnapshot;
use meshsmith_core::types::{JobId, TaskId};
use meshsmith_db::{JobStore, StoreError};
use meshsmith_provider::{ProviderClient, ProviderKind};

use crate::poller::{PollerConfig, PollerRegistry};
use crate::reconciler::StatusReconciler;
use crate::submitter::{SubmitterConfig, TaskSubmitter};
use crate::PipelineError;

#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub submitter: SubmitterConfig,
    pub poller: PollerConfig,
}

pub struct GenerationService {
    store: Arc<dyn JobStore>,
    provider: Arc<dyn ProviderClient>,
    submitter: TaskSubmitter,
    reconciler: Arc<StatusReconciler>,
    pollers: PollerRegistry,
}

impl GenerationService {
    pub fn new(
        store: Arc<dyn JobStore>,
        provider: Arc<dyn ProviderClient>,
        config: ServiceConfig,
    ) -> Self {
        let mode = config.submitter.mode;
        let reconciler = Arc::new(StatusReconciler::new(Arc::clone(&store), mode));
        let submitter = TaskSubmitter::new(Arc::clone(&store), Arc::clone(&provider), config.submitter);
        let pollers = PollerRegistry::new(Arc::clone(&provider), Arc::clone(&reconciler), config.poller);
        Self {
            store,
            provider,
            submitter,
            reconciler,
            pollers,
        }
    }

    /// Submit a preview and start polling it.
    pub async fn submit(&self, prompt: &str, style: Option<&str>) -> Result<(TaskId, Job), PipelineError> {
        let (task_id, job) = self.submitter.start_preview(prompt, style).await?;
        self.pollers.start(job.id, &task_id).await;
        Ok((task_id, job))
    }

    /// Submit a refine and poll the new task in place of the preview.
    pub async fn refine(
        &self,
        id: JobId,
        texture_prompt: Option<String>,
    ) -> Result<(TaskId, Job), PipelineError> {
        let (task_id, job) = self.submitter.start_refine(id, texture_prompt).await?;
        self.pollers.start(job.id, &task_id).await;
        Ok((task_id, job))
    }

    pub async fn cancel(&self, id: JobId) -> Result<Job, PipelineError> {
        self.pollers.stop(id).await;
        self.submitter.cancel(id).await
    }

    /// Stop the job's poller, then remove the job.
    pub async fn delete(&self, id: JobId) -> Result<(), PipelineError> {
        self.pollers.stop(id).await;
        if !self.store.delete(id).await? {
            return Err(StoreError::NotFound(id).into());
        }
        tracing::info!(job_id = %id, "Job deleted");
        Ok(())
    }

    pub async fn get(&self, id: JobId) -> Result<Job, PipelineError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list(&self, limit: Option<i64>) -> Result<Vec<Job>, PipelineError> {
        Ok(self.store.list(meshsmith_db::clamp_limit(limit)).await?)
    }

    /// Query the provider directly. The snapshot is also offered to the
    /// reconciler, which ignores it unless it advances an active job.
    pub async fn query_task(&self, task_id: &str) -> Result<TaskSnapshot, PipelineError> {
        if task_id.trim().is_empty() {
            return Err(CoreError::Validation("Task id must not be empty".into()).into());
        }
        let snapshot = self.provider.query(task_id).await?;
        if let Err(e) = self.reconciler.reconcile(&snapshot).await {
            tracing::warn!(task_id = %task_id, error = %e, "Reconcile after direct query failed");
        }
        Ok(snapshot)
    }

    /// Restart polling for every job left `generating` by a previous run.
    pub async fn resume_active(&self) -> Result<usize, PipelineError> {
        let mut resumed = 0;
        for job in self.store.list_generating().await? {
            if let Some(task_id) = job.active_task_id() {
                if self.pollers.start(job.id, task_id).await {
                    resumed += 1;
                }
            }
        }
        if resumed > 0 {
            tracing::info!(count = resumed, "Resumed pollers for generating jobs");
        }
        Ok(resumed)
    }

    pub async fn is_polling(&self, id: JobId) -> bool {
        self.pollers.is_polling(id).await
    }

    pub async fn shutdown(&self) {
        self.pollers.shutdown().await;
    }

    pub fn mode(&self) -> PipelineMode {
        self.submitter.mode()
    }

    pub fn storage_backend(&self) -> &'static str {
        self.store.backend()
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider.kind()
    }
}
