//! Text-to-3D provider clients.
//!
//! [`ProviderClient`] is the single seam between the lifecycle and the
//! generation service. Two implementations exist: [`meshy::MeshyApi`]
//! talks to the real HTTP API, [`mock::MockProvider`] simulates it
//! deterministically. Which one runs is decided once, from
//! [`ProviderSettings`], by [`build_provider`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use meshsmith_core::task::TaskSnapshot;
use meshsmith_core::types::TaskId;

pub mod meshy;
pub mod mock;

pub use meshy::{MeshyApi, MeshyConfig};
pub use mock::{MockConfig, MockProvider};

/// Parameters for a low-fidelity preview task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewRequest {
    /// Prompt as sent to the provider (already enhanced).
    pub prompt: String,
    pub style: String,
    pub target_polycount: u32,
    /// Ask for an A-pose (character-like subjects).
    pub a_pose: bool,
}

/// Parameters for a refine task on top of a succeeded preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefineRequest {
    pub preview_task_id: TaskId,
    pub texture_prompt: Option<String>,
}

/// Contract shared by the real provider and the simulator.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Start a preview task and return its id.
    async fn submit_preview(&self, request: &PreviewRequest) -> Result<TaskId, ProviderError>;

    /// Start a refine task. The provider rejects a preview that never
    /// succeeded; callers do not pre-validate.
    async fn submit_refine(&self, request: &RefineRequest) -> Result<TaskId, ProviderError>;

    /// Current state of a task. Unknown ids are [`ProviderError::NotFound`],
    /// never a pending snapshot.
    async fn query(&self, task_id: &str) -> Result<TaskSnapshot, ProviderError>;

    fn kind(&self) -> ProviderKind;
}

/// Errors from either provider implementation.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, decode).
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a non-2xx status.
    #[error("Provider API error ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Provider misconfigured: {0}")]
    Config(String),
}

impl ProviderError {
    /// Whether retrying the same call later may succeed.
    ///
    /// Connection problems, timeouts, rate limiting and 5xx responses are
    /// transient. Everything else is an answer.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => !e.is_decode() && !e.is_builder(),
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::NotFound(_) | Self::InvalidResponse(_) | Self::Config(_) => false,
        }
    }
}

/// Which [`ProviderClient`] implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Meshy,
    Mock,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Meshy => "meshy",
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "meshy" => Ok(Self::Meshy),
            "mock" => Ok(Self::Mock),
            other => Err(ProviderError::Config(format!(
                "unknown provider '{other}', expected 'meshy' or 'mock'"
            ))),
        }
    }
}

/// Everything needed to construct either provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub meshy: MeshyConfig,
    pub mock: MockConfig,
}

/// Build the configured provider.
pub fn build_provider(settings: &ProviderSettings) -> Result<Arc<dyn ProviderClient>, ProviderError> {
    let provider: Arc<dyn ProviderClient> = match settings.kind {
        ProviderKind::Meshy => Arc::new(MeshyApi::new(&settings.meshy)?),
        ProviderKind::Mock => Arc::new(MockProvider::new(settings.mock.clone())),
    };
    tracing::info!(provider = %settings.kind, "Provider client selected");
    Ok(provider)
}
