//! Job Store: durable (Postgres) and non-durable (in-memory) records of
//! generation jobs behind one [`JobStore`] trait.
//!
//! All writes go through [`JobStore::update`], which is conditional on a
//! [`Precondition`]. A store rejects the write when the stored job no
//! longer matches what the caller expected to see.

use std::time::Duration;

use async_trait::async_trait;
use meshsmith_core::error::CoreError;
use meshsmith_core::job::{Job, JobPatch, NewJob, Precondition};
use meshsmith_core::types::JobId;
use sqlx::postgres::PgPoolOptions;

pub mod memory;
pub mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

pub type DbPool = sqlx::PgPool;

/// Maximum page size for job listing.
pub const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
pub const DEFAULT_LIMIT: i64 = 50;

/// Clamp a requested page size into `1..=MAX_LIMIT`.
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// Errors from any [`JobStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(JobId),

    /// The stored job moved on since the caller read it.
    #[error("Precondition failed for job {id}: now {} ({})", .current.stage, .current.status)]
    PreconditionFailed { id: JobId, current: Box<Job> },

    /// The patch would break a record invariant (stage regression, second
    /// refine task).
    #[error(transparent)]
    Invalid(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A persisted row could not be decoded into a [`Job`].
    #[error("Corrupt job row {id}: {reason}")]
    Corrupt { id: JobId, reason: String },
}

/// Read/write contract the lifecycle depends on.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in `preview` / `generating`.
    async fn create(&self, input: NewJob) -> Result<Job, StoreError>;

    async fn get(&self, id: JobId) -> Result<Job, StoreError>;

    /// Apply `patch` only if the stored job satisfies `precondition`.
    async fn update(
        &self,
        id: JobId,
        patch: &JobPatch,
        precondition: &Precondition,
    ) -> Result<Job, StoreError>;

    /// Newest first, at most `limit` (already clamped by the caller).
    async fn list(&self, limit: i64) -> Result<Vec<Job>, StoreError>;

    /// The job whose *active* task (per its stage) is `task_id`, if any.
    async fn find_by_active_task(&self, task_id: &str) -> Result<Option<Job>, StoreError>;

    /// Jobs currently in `generating`, oldest first.
    async fn list_generating(&self) -> Result<Vec<Job>, StoreError>;

    /// Remove a job. Returns `false` if it did not exist.
    async fn delete(&self, id: JobId) -> Result<bool, StoreError>;

    /// Short backend name for health reporting.
    fn backend(&self) -> &'static str;
}

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to confirm the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded migrations in `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Connect, verify and migrate: everything needed before a
/// [`PgJobStore`] can serve requests.
pub async fn connect(database_url: &str) -> Result<DbPool, StoreError> {
    let pool = create_pool(database_url).await?;
    tracing::info!("Database connection pool created");

    health_check(&pool).await?;
    run_migrations(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}
