use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderValue;
use meshsmith_core::job::PipelineMode;
use meshsmith_pipeline::{PollerConfig, ServiceConfig, SubmitterConfig};
use meshsmith_provider::{MeshyConfig, MockConfig, ProviderKind, ProviderSettings};

/// A configuration value that could not be used.
#[derive(Debug, thiserror::Error)]
#[error("Invalid {key} '{value}': {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development against the
/// simulated provider.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<HeaderValue>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// PostgreSQL URL. Unset means jobs live in memory only.
    pub database_url: Option<String>,
    pub provider: ProviderSettings,
    pub pipeline: ServiceConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `DATABASE_URL`         | unset (in-memory store)    |
    /// | `PROVIDER`             | `mock`                     |
    /// | `MESHY_API_KEY`        | empty                      |
    /// | `MESHY_BASE_URL`       | `https://api.meshy.ai`     |
    /// | `MOCK_PREVIEW_SECS`    | `5`                        |
    /// | `MOCK_REFINE_SECS`     | `8`                        |
    /// | `MOCK_RETENTION_SECS`  | `86400`                    |
    /// | `PIPELINE_MODE`        | `two_stage`                |
    /// | `TARGET_POLYCOUNT`     | `50000`                    |
    /// | `POLL_INTERVAL_SECS`   | `5`                        |
    /// | `POLL_TIMEOUT_SECS`    | `1800` (`0` disables)      |
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_var("PORT", 3000)?;

        let cors_origins = var("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173".into())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|origin| {
                origin.parse::<HeaderValue>().map_err(|e| ConfigError {
                    key: "CORS_ORIGINS",
                    value: origin.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let request_timeout_secs: u64 = parse_var("REQUEST_TIMEOUT_SECS", 30)?;
        let database_url = var("DATABASE_URL");

        let provider_name = var("PROVIDER").unwrap_or_else(|| ProviderKind::Mock.to_string());
        let kind = provider_name.parse::<ProviderKind>().map_err(|e| ConfigError {
            key: "PROVIDER",
            value: provider_name.clone(),
            reason: e.to_string(),
        })?;
        let provider = ProviderSettings {
            kind,
            meshy: MeshyConfig {
                api_key: var("MESHY_API_KEY").unwrap_or_default(),
                base_url: var("MESHY_BASE_URL")
                    .unwrap_or_else(|| meshsmith_provider::meshy::DEFAULT_BASE_URL.into()),
                ..Default::default()
            },
            mock: MockConfig {
                preview_duration: Duration::from_secs(parse_var("MOCK_PREVIEW_SECS", 5)?),
                refine_duration: Duration::from_secs(parse_var("MOCK_REFINE_SECS", 8)?),
                retention: Duration::from_secs(parse_var("MOCK_RETENTION_SECS", 86_400)?),
            },
        };

        let poll_timeout_secs: u64 = parse_var("POLL_TIMEOUT_SECS", 1800)?;
        let pipeline = ServiceConfig {
            submitter: SubmitterConfig {
                mode: parse_var("PIPELINE_MODE", PipelineMode::TwoStage)?,
                target_polycount: parse_var("TARGET_POLYCOUNT", 50_000)?,
            },
            poller: PollerConfig {
                interval: Duration::from_secs(parse_var::<u64>("POLL_INTERVAL_SECS", 5)?.max(1)),
                timeout: (poll_timeout_secs > 0).then(|| Duration::from_secs(poll_timeout_secs)),
            },
        };

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            database_url,
            provider,
            pipeline,
        })
    }
}

/// A set, non-blank environment variable.
fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
