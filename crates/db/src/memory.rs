//! In-process job store.
//!
//! Used when no database is configured (degraded, non-durable mode) and
//! as the store behind the pipeline and API tests. The precondition check
//! and the mutation happen under one write lock, which gives the same
//! compare-and-set guarantee as the row lock in [`crate::PgJobStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use meshsmith_core::job::{Job, JobPatch, JobStatus, NewJob, Precondition};
use meshsmith_core::types::JobId;
use tokio::sync::RwLock;

use crate::{JobStore, StoreError};

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, input: NewJob) -> Result<Job, StoreError> {
        let job = Job::new(input);
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn update(
        &self,
        id: JobId,
        patch: &JobPatch,
        precondition: &Precondition,
    ) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if !precondition.matches(stored) {
            return Err(StoreError::PreconditionFailed {
                id,
                current: Box::new(stored.clone()),
            });
        }

        // Apply to a copy so a rejected patch leaves the stored job intact.
        let mut next = stored.clone();
        patch.apply(&mut next)?;
        *stored = next.clone();
        Ok(next)
    }

    async fn list(&self, limit: i64) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut all: Vec<Job> = jobs.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        all.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(all)
    }

    async fn find_by_active_task(&self, task_id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .find(|job| job.active_task_id() == Some(task_id))
            .cloned())
    }

    async fn list_generating(&self) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut active: Vec<Job> = jobs
            .values()
            .filter(|job| job.status == JobStatus::Generating)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(active)
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        Ok(self.jobs.write().await.remove(&id).is_some())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use meshsmith_core::job::Stage;

    use super::*;

    fn new_job(task: &str) -> NewJob {
        NewJob {
            prompt: "a chess rook".into(),
            style: "realistic".into(),
            preview_task_id: task.into(),
        }
    }

    #[tokio::test]
    async fn create_then_get() {
        let store = MemoryJobStore::new();
        let job = store.create(new_job("t1")).await.unwrap();
        let fetched = store.get(job.id).await.unwrap();
        assert_eq!(fetched, job);
        assert_eq!(fetched.stage, Stage::Preview);
        assert_eq!(fetched.status, JobStatus::Generating);
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let store = MemoryJobStore::new();
        let id = uuid::Uuid::now_v7();
        assert_matches!(store.get(id).await, Err(StoreError::NotFound(missing)) if missing == id);
    }

    #[tokio::test]
    async fn update_respects_precondition() {
        let store = MemoryJobStore::new();
        let job = store.create(new_job("t1")).await.unwrap();
        let patch = JobPatch {
            status: Some(JobStatus::Succeeded),
            ..Default::default()
        };
        let expect_generating = Precondition::new().status(JobStatus::Generating);

        let updated = store.update(job.id, &patch, &expect_generating).await.unwrap();
        assert_eq!(updated.status, JobStatus::Succeeded);
        assert_eq!(updated.version, job.version + 1);

        let second = store.update(job.id, &patch, &expect_generating).await;
        assert_matches!(second, Err(StoreError::PreconditionFailed { current, .. }) => {
            assert_eq!(current.version, updated.version);
        });
    }

    #[tokio::test]
    async fn invalid_patch_leaves_job_untouched() {
        let store = MemoryJobStore::new();
        let job = store.create(new_job("t1")).await.unwrap();
        store
            .update(
                job.id,
                &JobPatch {
                    stage: Some(Stage::Ready),
                    ..Default::default()
                },
                &Precondition::new(),
            )
            .await
            .unwrap();

        let regress = JobPatch {
            stage: Some(Stage::Preview),
            progress: Some(10),
            ..Default::default()
        };
        assert_matches!(
            store.update(job.id, &regress, &Precondition::new()).await,
            Err(StoreError::Invalid(_))
        );
        let stored = store.get(job.id).await.unwrap();
        assert_eq!(stored.stage, Stage::Ready);
        assert_eq!(stored.progress, 0);
    }

    #[tokio::test]
    async fn list_is_newest_first_and_limited() {
        let store = MemoryJobStore::new();
        let a = store.create(new_job("a")).await.unwrap();
        let b = store.create(new_job("b")).await.unwrap();
        let c = store.create(new_job("c")).await.unwrap();

        let ids: Vec<_> = store.list(10).await.unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![c.id, b.id, a.id]);
        assert_eq!(store.list(2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn find_by_active_task_ignores_superseded_preview() {
        let store = MemoryJobStore::new();
        let job = store.create(new_job("prev")).await.unwrap();
        assert_eq!(
            store.find_by_active_task("prev").await.unwrap().map(|j| j.id),
            Some(job.id)
        );

        store
            .update(
                job.id,
                &JobPatch {
                    stage: Some(Stage::Refining),
                    refine_task_id: Some("ref".into()),
                    ..Default::default()
                },
                &Precondition::new(),
            )
            .await
            .unwrap();

        assert!(store.find_by_active_task("prev").await.unwrap().is_none());
        assert!(store.find_by_active_task("ref").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_removes_job() {
        let store = MemoryJobStore::new();
        let job = store.create(new_job("t1")).await.unwrap();
        assert!(store.delete(job.id).await.unwrap());
        assert!(!store.delete(job.id).await.unwrap());
        assert!(store.list_generating().await.unwrap().is_empty());
    }
}
