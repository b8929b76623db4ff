//! REST client for the Meshy text-to-3D API.
//!
//! Wraps `POST /openapi/v2/text-to-3d` (preview and refine submission)
//! and `GET /openapi/v2/text-to-3d/{task_id}` (status) using [`reqwest`].

use std::time::Duration;

use async_trait::async_trait;
use meshsmith_core::task::{TaskSnapshot, TaskStatus};
use meshsmith_core::types::TaskId;
use serde::Deserialize;

use crate::{PreviewRequest, ProviderClient, ProviderError, ProviderKind, RefineRequest};

/// Default public API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.meshy.ai";

/// Path shared by task creation and status lookups.
const TEXT_TO_3D_PATH: &str = "/openapi/v2/text-to-3d";

const AI_MODEL: &str = "meshy-6";

/// Message used when the provider reports `EXPIRED`.
const EXPIRED_MESSAGE: &str = "task expired";

/// Connection settings for [`MeshyApi`].
#[derive(Debug, Clone)]
pub struct MeshyConfig {
    pub api_key: String,
    /// Base URL without trailing slash, e.g. `https://api.meshy.ai`.
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for MeshyConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Response of the task creation endpoint.
#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    result: TaskId,
}

/// Raw task status as the provider spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum RemoteStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Expired,
    /// Any status this client does not know yet; treated as still running.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
struct ModelUrls {
    glb: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TaskError {
    #[serde(default)]
    message: String,
}

/// Body of `GET /openapi/v2/text-to-3d/{task_id}`. Only the fields the
/// lifecycle uses are decoded.
#[derive(Debug, Deserialize)]
struct RemoteTask {
    #[serde(default)]
    id: Option<TaskId>,
    status: RemoteStatus,
    #[serde(default)]
    progress: i64,
    #[serde(default)]
    model_urls: Option<ModelUrls>,
    #[serde(default)]
    thumbnail_url: Option<String>,
    #[serde(default)]
    task_error: Option<TaskError>,
}

impl RemoteTask {
    /// Map onto the provider-neutral snapshot for `requested`, the id the
    /// task was fetched by. A body describing another task is rejected.
    fn into_snapshot(self, requested: &str) -> Result<TaskSnapshot, ProviderError> {
        if let Some(id) = self.id.as_deref().filter(|id| *id != requested) {
            return Err(ProviderError::InvalidResponse(format!(
                "queried task {requested} but provider answered for {id}"
            )));
        }
        let task_id = requested.to_string();

        // The API sends `task_error: {"message": ""}` for healthy tasks.
        let error = self
            .task_error
            .map(|e| e.message)
            .filter(|m| !m.trim().is_empty());

        let snapshot = match self.status {
            RemoteStatus::Pending | RemoteStatus::InProgress | RemoteStatus::Unknown => {
                TaskSnapshot::pending(task_id, self.progress.clamp(0, 99) as i16)
            }
            // A success without a GLB is passed through; the lifecycle
            // rules turn it into a failure.
            RemoteStatus::Succeeded => TaskSnapshot {
                task_id,
                status: TaskStatus::Succeeded,
                progress: 100,
                model_url: self.model_urls.and_then(|urls| urls.glb),
                thumbnail_url: self.thumbnail_url,
                error: None,
            },
            RemoteStatus::Failed => TaskSnapshot::failed(task_id, error),
            RemoteStatus::Expired => {
                TaskSnapshot::failed(task_id, Some(error.unwrap_or_else(|| EXPIRED_MESSAGE.into())))
            }
        };
        Ok(snapshot)
    }
}

/// HTTP client for the Meshy API.
pub struct MeshyApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl MeshyApi {
    /// Build a client with its own connection pool and request timeout.
    ///
    /// Fails with [`ProviderError::Config`] when no API key is configured.
    pub fn new(config: &MeshyConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Self::with_client(client, config.base_url.clone(), config.api_key.clone())
    }

    /// Reuse an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        base_url: String,
        api_key: String,
    ) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::Config("MESHY_API_KEY is not set".into()));
        }
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn tasks_url(&self) -> String {
        format!("{}{TEXT_TO_3D_PATH}", self.base_url)
    }

    async fn create_task(&self, body: &serde_json::Value) -> Result<TaskId, ProviderError> {
        let response = self
            .client
            .post(self.tasks_url())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let created: CreateTaskResponse = Self::parse_response(response).await?;
        if created.result.trim().is_empty() {
            return Err(ProviderError::InvalidResponse("empty task id".into()));
        }
        Ok(created.result)
    }

    // ---- private helpers ----

    /// Return the response unchanged on 2xx, otherwise a
    /// [`ProviderError::Rejected`] carrying status and body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ProviderClient for MeshyApi {
    async fn submit_preview(&self, request: &PreviewRequest) -> Result<TaskId, ProviderError> {
        let mut body = serde_json::json!({
            "mode": "preview",
            "prompt": request.prompt,
            "art_style": request.style,
            "ai_model": AI_MODEL,
            "topology": "quad",
            "target_polycount": request.target_polycount,
            "should_remesh": true,
            "symmetry_mode": "auto",
        });
        if request.a_pose {
            body["pose_mode"] = "a-pose".into();
        }

        let task_id = self.create_task(&body).await?;
        tracing::debug!(task_id = %task_id, "Meshy preview task created");
        Ok(task_id)
    }

    async fn submit_refine(&self, request: &RefineRequest) -> Result<TaskId, ProviderError> {
        let mut body = serde_json::json!({
            "mode": "refine",
            "preview_task_id": request.preview_task_id,
            "enable_pbr": true,
        });
        if let Some(texture) = request.texture_prompt.as_deref().filter(|t| !t.trim().is_empty()) {
            body["texture_prompt"] = texture.into();
        }

        let task_id = self.create_task(&body).await?;
        tracing::debug!(
            task_id = %task_id,
            preview_task_id = %request.preview_task_id,
            "Meshy refine task created",
        );
        Ok(task_id)
    }

    async fn query(&self, task_id: &str) -> Result<TaskSnapshot, ProviderError> {
        let response = self
            .client
            .get(format!("{}/{task_id}", self.tasks_url()))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(task_id.to_string()));
        }

        let task: RemoteTask = Self::parse_response(response).await?;
        task.into_snapshot(task_id)
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Meshy
    }
}
