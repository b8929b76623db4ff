//! Deterministic stand-in for the real provider.
//!
//! Tasks complete on a fixed schedule measured from submission. Assets
//! come from a small catalog of hosted sample models, picked round-robin
//! per preview; a refine reuses its preview's catalog entry so the
//! refined asset matches the preview subject.
//!
//! Time is read from [`tokio::time::Instant`], so tests can drive the
//! schedule with a paused clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use meshsmith_core::task::TaskSnapshot;
use meshsmith_core::types::TaskId;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{PreviewRequest, ProviderClient, ProviderError, ProviderKind, RefineRequest};

/// Highest progress a still-running simulated task reports.
const MAX_RUNNING_PROGRESS: f64 = 95.0;

/// A hosted sample model with separate preview and refined renditions.
struct CatalogEntry {
    preview_model: &'static str,
    preview_thumbnail: &'static str,
    refined_model: &'static str,
    refined_thumbnail: &'static str,
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        preview_model: "https://models.meshsmith.dev/samples/duck/preview.glb",
        preview_thumbnail: "https://models.meshsmith.dev/samples/duck/preview.png",
        refined_model: "https://models.meshsmith.dev/samples/duck/refined.glb",
        refined_thumbnail: "https://models.meshsmith.dev/samples/duck/refined.png",
    },
    CatalogEntry {
        preview_model: "https://models.meshsmith.dev/samples/helmet/preview.glb",
        preview_thumbnail: "https://models.meshsmith.dev/samples/helmet/preview.png",
        refined_model: "https://models.meshsmith.dev/samples/helmet/refined.glb",
        refined_thumbnail: "https://models.meshsmith.dev/samples/helmet/refined.png",
    },
    CatalogEntry {
        preview_model: "https://models.meshsmith.dev/samples/lantern/preview.glb",
        preview_thumbnail: "https://models.meshsmith.dev/samples/lantern/preview.png",
        refined_model: "https://models.meshsmith.dev/samples/lantern/refined.glb",
        refined_thumbnail: "https://models.meshsmith.dev/samples/lantern/refined.png",
    },
];

/// Simulated durations.
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub preview_duration: Duration,
    pub refine_duration: Duration,
    /// How long a finished task stays queryable (and refinable).
    pub retention: Duration,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            preview_duration: Duration::from_secs(5),
            refine_duration: Duration::from_secs(8),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    Preview,
    Refine,
}

#[derive(Debug, Clone)]
struct SimulatedTask {
    kind: TaskKind,
    started_at: Instant,
    duration: Duration,
    catalog_index: usize,
}

impl SimulatedTask {
    fn is_done(&self, now: Instant) -> bool {
        now.duration_since(self.started_at) >= self.duration
    }

    fn snapshot(&self, task_id: &str, now: Instant) -> TaskSnapshot {
        let entry = &CATALOG[self.catalog_index % CATALOG.len()];
        if self.is_done(now) {
            return match self.kind {
                TaskKind::Preview => {
                    TaskSnapshot::succeeded(task_id, entry.preview_model, entry.preview_thumbnail)
                }
                TaskKind::Refine => {
                    TaskSnapshot::succeeded(task_id, entry.refined_model, entry.refined_thumbnail)
                }
            };
        }
        let elapsed = now.duration_since(self.started_at).as_secs_f64();
        let ratio = elapsed / self.duration.as_secs_f64() * 100.0;
        TaskSnapshot::pending(task_id, ratio.min(MAX_RUNNING_PROGRESS).floor() as i16)
    }
}

/// In-process simulator implementing [`ProviderClient`].
pub struct MockProvider {
    config: MockConfig,
    tasks: Mutex<HashMap<TaskId, SimulatedTask>>,
    next_entry: AtomicUsize,
}

impl MockProvider {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            tasks: Mutex::new(HashMap::new()),
            next_entry: AtomicUsize::new(0),
        }
    }

    /// Store a new task, evicting tasks finished longer ago than the
    /// retention window.
    async fn register(&self, task: SimulatedTask) -> TaskId {
        let task_id = uuid::Uuid::new_v4().to_string();
        let now = task.started_at;
        let retention = self.config.retention;

        let mut tasks = self.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|_, t| now.duration_since(t.started_at) < t.duration + retention);
        let evicted = before - tasks.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted expired mock tasks");
        }
        tasks.insert(task_id.clone(), task);
        task_id
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(MockConfig::default())
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    async fn submit_preview(&self, request: &PreviewRequest) -> Result<TaskId, ProviderError> {
        let catalog_index = self.next_entry.fetch_add(1, Ordering::Relaxed) % CATALOG.len();
        let task_id = self
            .register(SimulatedTask {
                kind: TaskKind::Preview,
                started_at: Instant::now(),
                duration: self.config.preview_duration,
                catalog_index,
            })
            .await;
        tracing::debug!(
            task_id = %task_id,
            style = %request.style,
            "Mock preview task started",
        );
        Ok(task_id)
    }

    async fn submit_refine(&self, request: &RefineRequest) -> Result<TaskId, ProviderError> {
        let now = Instant::now();
        let catalog_index = {
            let tasks = self.tasks.lock().await;
            match tasks.get(&request.preview_task_id) {
                Some(task) if task.kind == TaskKind::Preview && task.is_done(now) => {
                    task.catalog_index
                }
                _ => {
                    return Err(ProviderError::Rejected {
                        status: 400,
                        body: format!(
                            "preview task {} has not succeeded",
                            request.preview_task_id
                        ),
                    });
                }
            }
        };

        let task_id = self
            .register(SimulatedTask {
                kind: TaskKind::Refine,
                started_at: now,
                duration: self.config.refine_duration,
                catalog_index,
            })
            .await;
        tracing::debug!(
            task_id = %task_id,
            preview_task_id = %request.preview_task_id,
            "Mock refine task started",
        );
        Ok(task_id)
    }

    async fn query(&self, task_id: &str) -> Result<TaskSnapshot, ProviderError> {
        let tasks = self.tasks.lock().await;
        let task = tasks
            .get(task_id)
            .ok_or_else(|| ProviderError::NotFound(task_id.to_string()))?;
        Ok(task.snapshot(task_id, Instant::now()))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }
}
