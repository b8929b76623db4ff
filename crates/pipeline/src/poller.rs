//! Status Poller: one cancellable loop per generating job.
//!
//! Each loop ticks on a [`tokio::time::interval`], queries the job's active
//! task and hands the snapshot to the [`StatusReconciler`]. It stops on its
//! own once the job is no longer generating on that task. The query and
//! the reconcile run inside `tokio::select!` against the loop's
//! [`CancellationToken`], so once a loop is stopped it writes nothing more.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use meshsmith_core::types::{JobId, TaskId};
use meshsmith_provider::{ProviderClient, ProviderError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::reconciler::StatusReconciler;

/// Default delay between two status queries for one job.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default wall-clock bound for one loop.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// How long [`PollerRegistry::stop`] waits for a loop to exit.
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    /// `None` polls until the provider reports a terminal state.
    pub timeout: Option<Duration>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: Some(DEFAULT_POLL_TIMEOUT),
        }
    }
}

/// Owner of one running poll loop. Dropping the handle cancels the loop.
pub struct PollHandle {
    task_id: TaskId,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel the loop and wait (bounded) until it has exited.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            if tokio::time::timeout(STOP_GRACE, join).await.is_err() {
                tracing::warn!(task_id = %self.task_id, "Poll loop did not exit in time");
            }
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The set of running poll loops, at most one per job.
pub struct PollerRegistry {
    provider: Arc<dyn ProviderClient>,
    reconciler: Arc<StatusReconciler>,
    config: PollerConfig,
    handles: Mutex<HashMap<JobId, PollHandle>>,
    /// Parent of every loop token; cancelled on shutdown.
    shutdown: CancellationToken,
}

impl PollerRegistry {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        reconciler: Arc<StatusReconciler>,
        config: PollerConfig,
    ) -> Self {
        Self {
            provider,
            reconciler,
            config,
            handles: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start polling `task_id` for `job_id`.
    ///
    /// A live loop already polling the same task is kept and `false` is
    /// returned. A loop for a different task is replaced.
    pub async fn start(&self, job_id: JobId, task_id: &str) -> bool {
        let mut handles = self.handles.lock().await;
        prune_finished(&mut handles);

        if let Some(existing) = handles.get(&job_id) {
            if existing.task_id() == task_id {
                return false;
            }
            tracing::debug!(
                job_id = %job_id,
                old_task_id = %existing.task_id(),
                task_id = %task_id,
                "Replacing poller for new active task",
            );
        }

        let cancel = self.shutdown.child_token();
        let poll = PollLoop {
            job_id,
            task_id: task_id.to_string(),
            provider: Arc::clone(&self.provider),
            reconciler: Arc::clone(&self.reconciler),
            timeout: self.config.timeout,
            started: Instant::now(),
            ticker: ticker(self.config.interval),
        };
        let join = tokio::spawn(poll.run(cancel.clone()));

        // Inserting drops (and so cancels) any previous handle.
        handles.insert(
            job_id,
            PollHandle {
                task_id: task_id.to_string(),
                cancel,
                join: Some(join),
            },
        );
        true
    }

    /// Stop the loop for `job_id`, if any, and wait for it to exit.
    pub async fn stop(&self, job_id: JobId) -> bool {
        let handle = self.handles.lock().await.remove(&job_id);
        match handle {
            Some(handle) => {
                tracing::debug!(job_id = %job_id, task_id = %handle.task_id(), "Stopping poller");
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    /// Whether a loop for `job_id` is still running.
    pub async fn is_polling(&self, job_id: JobId) -> bool {
        let mut handles = self.handles.lock().await;
        prune_finished(&mut handles);
        handles.contains_key(&job_id)
    }

    pub async fn active_count(&self) -> usize {
        let mut handles = self.handles.lock().await;
        prune_finished(&mut handles);
        handles.len()
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.handles.lock().await.len()
    }

    /// Cancel every loop and wait for all of them to exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down pollers");
        self.shutdown.cancel();

        let drained: Vec<_> = self.handles.lock().await.drain().map(|(_, h)| h).collect();
        futures::future::join_all(drained.into_iter().map(PollHandle::stop)).await;

        tracing::info!("Pollers shut down");
    }
}

/// Drop handles whose loop already exited on its own.
fn prune_finished(handles: &mut HashMap<JobId, PollHandle>) {
    handles.retain(|_, handle| !handle.is_finished());
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

enum Step {
    Continue,
    Stop,
}

struct PollLoop {
    job_id: JobId,
    task_id: TaskId,
    provider: Arc<dyn ProviderClient>,
    reconciler: Arc<StatusReconciler>,
    timeout: Option<Duration>,
    started: Instant,
    ticker: Interval,
}

impl PollLoop {
    async fn run(mut self, cancel: CancellationToken) {
        let job_id = self.job_id;
        let task_id = self.task_id.clone();
        tracing::debug!(job_id = %job_id, task_id = %task_id, "Poller started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(job_id = %job_id, task_id = %task_id, "Poller cancelled");
                    return;
                }
                step = self.tick() => {
                    if let Step::Stop = step {
                        break;
                    }
                }
            }
        }

        tracing::debug!(job_id = %job_id, task_id = %task_id, "Poller finished");
    }

    async fn tick(&mut self) -> Step {
        self.ticker.tick().await;

        if let Some(limit) = self.timeout {
            if self.started.elapsed() >= limit {
                let message = format!("generation timed out after {} s", limit.as_secs());
                return self.fail(&message).await;
            }
        }

        let snapshot = match self.provider.query(&self.task_id).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    job_id = %self.job_id,
                    task_id = %self.task_id,
                    error = %e,
                    "Status query failed, retrying",
                );
                return Step::Continue;
            }
            Err(ProviderError::NotFound(_)) => {
                let message = format!("task {} not found at provider", self.task_id);
                return self.fail(&message).await;
            }
            Err(e) => return self.fail(&e.to_string()).await,
        };

        match self.reconciler.reconcile(&snapshot).await {
            Ok(outcome) if outcome.keeps_polling(&self.task_id) => Step::Continue,
            Ok(_) => Step::Stop,
            Err(e) => {
                tracing::error!(
                    job_id = %self.job_id,
                    task_id = %self.task_id,
                    error = %e,
                    "Reconcile failed, retrying",
                );
                Step::Continue
            }
        }
    }

    /// Force-fail the job. A store error keeps the loop alive so the
    /// failure is retried on the next tick.
    async fn fail(&self, message: &str) -> Step {
        tracing::warn!(
            job_id = %self.job_id,
            task_id = %self.task_id,
            reason = %message,
            "Failing job from poller",
        );
        match self.reconciler.force_fail(&self.task_id, message).await {
            Ok(_) => Step::Stop,
            Err(e) => {
                tracing::error!(job_id = %self.job_id, error = %e, "Force-fail not recorded");
                Step::Continue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use meshsmith_core::job::{JobStatus, PipelineMode};
    use meshsmith_db::{JobStore, MemoryJobStore};
    use meshsmith_provider::{MockConfig, MockProvider, PreviewRequest};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn finished_loops_are_pruned_on_read() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let provider = Arc::new(MockProvider::new(MockConfig {
            preview_duration: Duration::from_secs(2),
            ..Default::default()
        }));
        let task_id = provider
            .submit_preview(&PreviewRequest {
                prompt: "a bell".into(),
                style: "cartoon".into(),
                target_polycount: 10_000,
                a_pose: false,
            })
            .await
            .unwrap();
        let job = store
            .create(meshsmith_core::job::NewJob {
                prompt: "a bell".into(),
                style: "cartoon".into(),
                preview_task_id: task_id.clone(),
            })
            .await
            .unwrap();

        let reconciler = Arc::new(StatusReconciler::new(
            Arc::clone(&store),
            PipelineMode::SingleStage,
        ));
        let registry = PollerRegistry::new(
            provider,
            reconciler,
            PollerConfig {
                interval: Duration::from_secs(1),
                timeout: None,
            },
        );

        assert!(registry.start(job.id, &task_id).await);
        assert_eq!(registry.active_count().await, 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Succeeded);

        assert!(!registry.is_polling(job.id).await);
        assert_eq!(registry.tracked().await, 0);
        assert_eq!(registry.active_count().await, 0);
    }
}
