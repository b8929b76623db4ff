#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderValue, Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use meshsmith_api::config::ServerConfig;
use meshsmith_api::router::build_app_router;
use meshsmith_api::state::AppState;
use meshsmith_db::{JobStore, MemoryJobStore};
use meshsmith_pipeline::{GenerationService, PollerConfig, ServiceConfig};
use meshsmith_provider::{
    MeshyConfig, MockConfig, MockProvider, ProviderKind, ProviderSettings,
};
use tower::ServiceExt;

/// Simulated task durations used by the API tests.
pub const PREVIEW_SECS: u64 = 5;
pub const REFINE_SECS: u64 = 8;

/// Build a test `ServerConfig`: in-memory store, simulated provider,
/// one-second polling.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec![HeaderValue::from_static("http://localhost:5173")],
        request_timeout_secs: 30,
        database_url: None,
        provider: ProviderSettings {
            kind: ProviderKind::Mock,
            meshy: MeshyConfig::default(),
            mock: MockConfig {
                preview_duration: Duration::from_secs(PREVIEW_SECS),
                refine_duration: Duration::from_secs(REFINE_SECS),
                ..Default::default()
            },
        },
        pipeline: ServiceConfig {
            poller: PollerConfig {
                interval: Duration::from_secs(1),
                timeout: None,
            },
            ..Default::default()
        },
    }
}

/// The full application (same middleware stack as the binary) plus the
/// service behind it.
pub struct TestApp {
    pub router: Router,
    pub service: Arc<GenerationService>,
    pub store: Arc<dyn JobStore>,
}

pub fn build_test_app() -> TestApp {
    build_test_app_with(test_config())
}

pub fn build_test_app_with(config: ServerConfig) -> TestApp {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let provider = Arc::new(MockProvider::new(config.provider.mock.clone()));
    let service = Arc::new(GenerationService::new(
        Arc::clone(&store),
        provider,
        config.pipeline.clone(),
    ));

    let state = AppState {
        service: Arc::clone(&service),
        pool: None,
        config: Arc::new(config.clone()),
    };

    TestApp {
        router: build_app_router(state, &config),
        service,
        store,
    }
}

/// Let the simulated provider and pollers advance by `secs`.
pub async fn advance(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn post_json(app: &Router, uri: &str, json: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn post_empty(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn delete(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
