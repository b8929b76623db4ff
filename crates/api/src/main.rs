use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use meshsmith_api::config::{ConfigError, ServerConfig};
use meshsmith_api::router::build_app_router;
use meshsmith_api::state::AppState;
use meshsmith_db::{DbPool, JobStore, MemoryJobStore, PgJobStore};
use meshsmith_pipeline::{GenerationService, PipelineError};
use meshsmith_provider::ProviderError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Anything that stops the server from starting or running.
#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Invalid HOST address '{0}'")]
    Host(String),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "meshsmith_api=debug,meshsmith_pipeline=debug,meshsmith_provider=debug,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    // --- Configuration ---
    let config = ServerConfig::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        provider = %config.provider.kind,
        pipeline_mode = %config.pipeline.submitter.mode,
        "Loaded server configuration",
    );

    // --- Job store ---
    let (store, pool) = open_store(config.database_url.as_deref()).await;

    // --- Provider ---
    let provider = meshsmith_provider::build_provider(&config.provider)?;

    // --- Generation service ---
    let service = Arc::new(GenerationService::new(
        store,
        provider,
        config.pipeline.clone(),
    ));
    service.resume_active().await?;

    // --- App state / router ---
    let state = AppState {
        service: Arc::clone(&service),
        pool,
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let ip: IpAddr = config
        .host
        .parse()
        .map_err(|_| StartupError::Host(config.host.clone()))?;
    let addr = SocketAddr::new(ip, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    service.shutdown().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// PostgreSQL when configured and reachable, otherwise a non-durable
/// in-memory store.
async fn open_store(database_url: Option<&str>) -> (Arc<dyn JobStore>, Option<DbPool>) {
    let memory: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let Some(url) = database_url else {
        tracing::warn!("DATABASE_URL not set; jobs are kept in memory and lost on restart");
        return (memory, None);
    };

    match meshsmith_db::connect(url).await {
        Ok(pool) => {
            let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
            (store, Some(pool))
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Database unavailable; falling back to in-memory job store",
            );
            (memory, None)
        }
    }
}

/// Wait for SIGINT or SIGTERM to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
