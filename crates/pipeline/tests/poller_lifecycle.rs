//! End-to-end lifecycle through `GenerationService` with the simulated
//! provider on a paused clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use meshsmith_core::job::{Job, JobPatch, JobStatus, NewJob, PipelineMode, Precondition, Stage};
use meshsmith_core::task::TaskSnapshot;
use meshsmith_core::types::{JobId, TaskId};
use meshsmith_db::{JobStore, MemoryJobStore, StoreError};
use meshsmith_pipeline::{GenerationService, PipelineError, PollerConfig, ServiceConfig, SubmitterConfig};
use meshsmith_provider::{
    MockConfig, MockProvider, PreviewRequest, ProviderClient, ProviderError, ProviderKind,
    RefineRequest,
};

// ---- Test doubles ----

/// Memory store that counts every update attempt.
#[derive(Default)]
struct CountingStore {
    inner: MemoryJobStore,
    updates: AtomicUsize,
}

impl CountingStore {
    fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for CountingStore {
    async fn create(&self, input: NewJob) -> Result<Job, StoreError> {
        self.inner.create(input).await
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        self.inner.get(id).await
    }

    async fn update(
        &self,
        id: JobId,
        patch: &JobPatch,
        precondition: &Precondition,
    ) -> Result<Job, StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update(id, patch, precondition).await
    }

    async fn list(&self, limit: i64) -> Result<Vec<Job>, StoreError> {
        self.inner.list(limit).await
    }

    async fn find_by_active_task(&self, task_id: &str) -> Result<Option<Job>, StoreError> {
        self.inner.find_by_active_task(task_id).await
    }

    async fn list_generating(&self) -> Result<Vec<Job>, StoreError> {
        self.inner.list_generating().await
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }

    fn backend(&self) -> &'static str {
        "counting"
    }
}

/// Simulator whose status queries take a while to answer and can be made
/// to fail transiently a fixed number of times.
struct SlowProvider {
    inner: MockProvider,
    delay: Duration,
    transient_failures: AtomicUsize,
}

impl SlowProvider {
    fn new(delay: Duration, transient_failures: usize) -> Self {
        Self {
            inner: MockProvider::new(MockConfig::default()),
            delay,
            transient_failures: AtomicUsize::new(transient_failures),
        }
    }
}

#[async_trait]
impl ProviderClient for SlowProvider {
    async fn submit_preview(&self, request: &PreviewRequest) -> Result<TaskId, ProviderError> {
        self.inner.submit_preview(request).await
    }

    async fn submit_refine(&self, request: &RefineRequest) -> Result<TaskId, ProviderError> {
        self.inner.submit_refine(request).await
    }

    async fn query(&self, task_id: &str) -> Result<TaskSnapshot, ProviderError> {
        tokio::time::sleep(self.delay).await;
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Rejected {
                status: 503,
                body: "overloaded".into(),
            });
        }
        self.inner.query(task_id).await
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }
}

// ---- Helpers ----

fn config(mode: PipelineMode, timeout: Option<Duration>) -> ServiceConfig {
    ServiceConfig {
        submitter: SubmitterConfig {
            mode,
            ..Default::default()
        },
        poller: PollerConfig {
            interval: Duration::from_secs(1),
            timeout,
        },
    }
}

fn mock_service(mode: PipelineMode) -> (Arc<dyn JobStore>, GenerationService) {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let provider = Arc::new(MockProvider::new(MockConfig::default()));
    let service = GenerationService::new(Arc::clone(&store), provider, config(mode, None));
    (store, service)
}

async fn wait(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

// ---- Test: preview to ready ----

#[tokio::test(start_paused = true)]
async fn poller_drives_two_stage_job_to_ready() {
    let (store, service) = mock_service(PipelineMode::TwoStage);
    let (_, job) = service.submit("a lighthouse", Some("realistic")).await.unwrap();
    assert!(service.is_polling(job.id).await);

    wait(2).await;
    let midway = store.get(job.id).await.unwrap();
    assert_eq!(midway.status, JobStatus::Generating);
    assert!(midway.progress > 0 && midway.progress <= 95);

    wait(4).await;
    let previewed = store.get(job.id).await.unwrap();
    assert_eq!(previewed.stage, Stage::Preview);
    assert_eq!(previewed.status, JobStatus::Succeeded);
    assert_eq!(previewed.progress, 100);
    assert!(previewed.model_url.is_some());
    assert!(!service.is_polling(job.id).await);

    let (refine_id, refining) = service.refine(job.id, None).await.unwrap();
    assert_eq!(refining.stage, Stage::Refining);
    assert!(service.is_polling(job.id).await);

    wait(10).await;
    let ready = store.get(job.id).await.unwrap();
    assert_eq!(ready.stage, Stage::Ready);
    assert_eq!(ready.status, JobStatus::Succeeded);
    assert_eq!(ready.refine_task_id.as_deref(), Some(refine_id.as_str()));
    assert!(ready.model_url.as_deref().unwrap().ends_with("refined.glb"));
    assert!(!service.is_polling(job.id).await);
}

#[tokio::test(start_paused = true)]
async fn single_stage_preview_is_final() {
    let (store, service) = mock_service(PipelineMode::SingleStage);
    let (_, job) = service.submit("a chess knight", None).await.unwrap();

    wait(6).await;
    let done = store.get(job.id).await.unwrap();
    assert_eq!(done.stage, Stage::Ready);
    assert_eq!(done.status, JobStatus::Succeeded);
}

// ---- Test: teardown ----

#[tokio::test(start_paused = true)]
async fn deleted_job_receives_no_writes_from_in_flight_query() {
    let store = Arc::new(CountingStore::default());
    let provider = Arc::new(SlowProvider::new(Duration::from_secs(3), 0));
    let service = GenerationService::new(
        store.clone(),
        provider,
        config(PipelineMode::TwoStage, None),
    );
    let (_, job) = service.submit("a teacup", None).await.unwrap();

    // The first query is still in flight at t=1.
    wait(1).await;
    service.delete(job.id).await.unwrap();
    assert!(!service.is_polling(job.id).await);

    wait(20).await;
    assert_eq!(store.updates(), 0);
    assert_matches!(service.get(job.id).await, Err(PipelineError::Store(StoreError::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn cancelled_job_stays_cancelled() {
    let store = Arc::new(CountingStore::default());
    let provider = Arc::new(SlowProvider::new(Duration::from_secs(3), 0));
    let service = GenerationService::new(
        store.clone(),
        provider,
        config(PipelineMode::TwoStage, None),
    );
    let (_, job) = service.submit("a teacup", None).await.unwrap();

    wait(1).await;
    let cancelled = service.cancel(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    let writes_after_cancel = store.updates();

    wait(20).await;
    assert_eq!(store.updates(), writes_after_cancel);
    assert_eq!(store.get(job.id).await.unwrap(), cancelled);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_every_poller() {
    let (_, service) = mock_service(PipelineMode::TwoStage);
    let (_, a) = service.submit("a cup", None).await.unwrap();
    let (_, b) = service.submit("a bowl", None).await.unwrap();

    service.shutdown().await;
    assert!(!service.is_polling(a.id).await);
    assert!(!service.is_polling(b.id).await);
}

// ---- Test: poller-originated failures ----

#[tokio::test(start_paused = true)]
async fn poll_timeout_fails_job() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let provider = Arc::new(MockProvider::new(MockConfig {
        preview_duration: Duration::from_secs(600),
        refine_duration: Duration::from_secs(600),
        ..Default::default()
    }));
    let service = GenerationService::new(
        Arc::clone(&store),
        provider,
        config(PipelineMode::TwoStage, Some(Duration::from_secs(3))),
    );
    let (_, job) = service.submit("a clock tower", None).await.unwrap();

    wait(5).await;
    let failed = store.get(job.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("generation timed out after 3 s"));
    assert!(!service.is_polling(job.id).await);
}

#[tokio::test(start_paused = true)]
async fn task_unknown_to_provider_fails_job() {
    let (store, service) = mock_service(PipelineMode::TwoStage);
    let job = store
        .create(NewJob {
            prompt: "a gear".into(),
            style: "realistic".into(),
            preview_task_id: "ghost".into(),
        })
        .await
        .unwrap();

    assert_eq!(service.resume_active().await.unwrap(), 1);
    wait(1).await;

    let failed = store.get(job.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("task ghost not found at provider"));
}

#[tokio::test(start_paused = true)]
async fn transient_query_errors_are_retried() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let provider = Arc::new(SlowProvider::new(Duration::ZERO, 3));
    let service = GenerationService::new(
        Arc::clone(&store),
        provider,
        config(PipelineMode::TwoStage, None),
    );
    let (_, job) = service.submit("a spoon", None).await.unwrap();

    wait(8).await;
    let done = store.get(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.error, None);
}

// ---- Test: resume ----

#[tokio::test(start_paused = true)]
async fn resume_starts_one_poller_per_generating_job() {
    let (store, service) = mock_service(PipelineMode::TwoStage);
    let (_, job) = service.submit("a dice tower", None).await.unwrap();

    // Already polled by `submit`, so nothing new starts.
    assert_eq!(service.resume_active().await.unwrap(), 0);

    wait(6).await;
    assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Succeeded);
    assert_eq!(service.resume_active().await.unwrap(), 0);
}
