use std::sync::Arc;

use meshsmith_pipeline::GenerationService;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything is behind an `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<GenerationService>,
    /// Database pool when running on PostgreSQL, `None` in memory mode.
    pub pool: Option<meshsmith_db::DbPool>,
    pub config: Arc<ServerConfig>,
}
