use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use meshsmith_core::error::CoreError;
use meshsmith_db::StoreError;
use meshsmith_pipeline::PipelineError;
use meshsmith_provider::ProviderError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] to produce consistent `{ "error", "code" }`
/// JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

type Classified = (StatusCode, &'static str, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core(core),
            AppError::Pipeline(PipelineError::Core(core)) => classify_core(core),
            AppError::Pipeline(PipelineError::Store(store)) => classify_store(store),
            AppError::Pipeline(PipelineError::Provider(provider)) => classify_provider(provider),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal() -> Classified {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

fn classify_core(err: &CoreError) -> Classified {
    match err {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Conflict(msg) | CoreError::InvalidTransition(msg) => {
            (StatusCode::CONFLICT, "CONFLICT", msg.clone())
        }
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            internal()
        }
    }
}

fn classify_store(err: &StoreError) -> Classified {
    match err {
        StoreError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Job with id {id} not found"),
        ),
        StoreError::PreconditionFailed { .. } => {
            (StatusCode::CONFLICT, "CONFLICT", err.to_string())
        }
        StoreError::Invalid(core) => classify_core(core),
        StoreError::Database(_) | StoreError::Migration(_) | StoreError::Corrupt { .. } => {
            tracing::error!(error = %err, "Job store error");
            internal()
        }
    }
}

fn classify_provider(err: &ProviderError) -> Classified {
    match err {
        ProviderError::NotFound(task_id) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Task {task_id} not found"),
        ),
        ProviderError::Config(msg) => {
            tracing::error!(error = %msg, "Provider misconfigured");
            internal()
        }
        ProviderError::Transport(_)
        | ProviderError::Rejected { .. }
        | ProviderError::InvalidResponse(_) => {
            tracing::warn!(error = %err, "Provider call failed");
            (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", err.to_string())
        }
    }
}
