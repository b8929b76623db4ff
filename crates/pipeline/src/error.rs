use meshsmith_core::error::CoreError;
use meshsmith_db::StoreError;
use meshsmith_provider::ProviderError;

/// Errors surfaced by the generation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
