//! PostgreSQL job store.
//!
//! Conditional updates lock the row with `SELECT ... FOR UPDATE`, check the
//! precondition against the locked state, and write the full row back in
//! the same transaction.

use async_trait::async_trait;
use meshsmith_core::job::{Job, JobPatch, JobStatus, NewJob, Precondition, Stage};
use meshsmith_core::types::{JobId, Timestamp};
use sqlx::{FromRow, PgPool};

use crate::{DbPool, JobStore, StoreError};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, prompt, style, stage, status, progress, \
    preview_task_id, refine_task_id, thumbnail_url, model_url, error, \
    version, created_at, updated_at";

/// A row from the `jobs` table, stage and status still as text.
#[derive(Debug, FromRow)]
struct JobRow {
    id: JobId,
    prompt: String,
    style: String,
    stage: String,
    status: String,
    progress: i16,
    preview_task_id: Option<String>,
    refine_task_id: Option<String>,
    thumbnail_url: Option<String>,
    model_url: Option<String>,
    error: Option<String>,
    version: i64,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt { id: row.id, reason };
        let stage: Stage = row.stage.parse().map_err(|e| corrupt(format!("{e}")))?;
        let status: JobStatus = row.status.parse().map_err(|e| corrupt(format!("{e}")))?;
        Ok(Job {
            id: row.id,
            prompt: row.prompt,
            style: row.style,
            stage,
            status,
            progress: row.progress,
            preview_task_id: row.preview_task_id,
            refine_task_id: row.refine_task_id,
            thumbnail_url: row.thumbnail_url,
            model_url: row.model_url,
            error: row.error,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>, StoreError> {
    rows.into_iter().map(Job::try_from).collect()
}

/// Durable store backed by a `sqlx` connection pool.
#[derive(Clone)]
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, input: NewJob) -> Result<Job, StoreError> {
        let job = Job::new(input);
        let query = format!(
            "INSERT INTO jobs \
                 (id, prompt, style, stage, status, progress, preview_task_id, \
                  version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(job.id)
            .bind(&job.prompt)
            .bind(&job.style)
            .bind(job.stage.as_str())
            .bind(job.status.as_str())
            .bind(job.progress)
            .bind(&job.preview_task_id)
            .bind(job.version)
            .bind(job.created_at)
            .bind(job.updated_at)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?
            .try_into()
    }

    async fn update(
        &self,
        id: JobId,
        patch: &JobPatch,
        precondition: &Precondition,
    ) -> Result<Job, StoreError> {
        let mut tx = self.pool.begin().await?;

        let select = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE");
        let mut job: Job = sqlx::query_as::<_, JobRow>(&select)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound(id))?
            .try_into()?;

        // Returning early drops `tx`, which rolls back and releases the lock.
        if !precondition.matches(&job) {
            return Err(StoreError::PreconditionFailed {
                id,
                current: Box::new(job),
            });
        }
        patch.apply(&mut job)?;

        let update = format!(
            "UPDATE jobs \
             SET stage = $2, status = $3, progress = $4, refine_task_id = $5, \
                 thumbnail_url = $6, model_url = $7, error = $8, \
                 version = $9, updated_at = $10 \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&update)
            .bind(id)
            .bind(job.stage.as_str())
            .bind(job.status.as_str())
            .bind(job.progress)
            .bind(&job.refine_task_id)
            .bind(&job.thumbnail_url)
            .bind(&job.model_url)
            .bind(&job.error)
            .bind(job.version)
            .bind(job.updated_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn list(&self, limit: i64) -> Result<Vec<Job>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             ORDER BY created_at DESC, id DESC \
             LIMIT $1"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        into_jobs(rows)
    }

    async fn find_by_active_task(&self, task_id: &str) -> Result<Option<Job>, StoreError> {
        // Mirrors `Job::active_task_id`; the final filter re-checks in Rust.
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE (stage = 'preview' AND preview_task_id = $1) \
                OR (stage IN ('refining', 'ready') AND refine_task_id = $1) \
                OR (stage = 'ready' AND refine_task_id IS NULL AND preview_task_id = $1)"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(into_jobs(rows)?
            .into_iter()
            .find(|job| job.active_task_id() == Some(task_id)))
    }

    async fn list_generating(&self) -> Result<Vec<Job>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status = $1 \
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(JobStatus::Generating.as_str())
            .fetch_all(&self.pool)
            .await?;
        into_jobs(rows)
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
