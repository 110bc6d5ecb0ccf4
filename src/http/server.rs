//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the demo handlers
//! - Wire up middleware (interceptor, timeout, body limit)
//! - Apply reloaded fault policies while serving
//! - Serve the metrics exposition on its own listener

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer};

use crate::config::{AppConfig, WorkloadConfig};
use crate::faults::FaultInjector;
use crate::http::handlers;
use crate::http::interceptor::{instrument, Instrumentation};
use crate::observability::MetricsRegistry;

/// Content type of the text exposition format.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Application state injected into handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub injector: Arc<FaultInjector>,
    pub workload: WorkloadConfig,
}

/// Instrumented demo HTTP server.
pub struct HttpServer {
    router: Router,
    injector: Arc<FaultInjector>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: &AppConfig, instrumentation: Instrumentation) -> Self {
        let injector = Arc::new(FaultInjector::new(config.faults.clone()));
        let state = AppState {
            injector: injector.clone(),
            workload: config.workload.clone(),
        };
        let router = build_router(config, state, instrumentation);
        Self { router, injector }
    }

    /// Handle to the live fault injector.
    pub fn injector(&self) -> Arc<FaultInjector> {
        self.injector.clone()
    }

    /// The fully layered router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires.
    ///
    /// Every config received on `config_updates` replaces the fault policy.
    /// Other sections only take effect after a restart.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<AppConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let injector = self.injector.clone();
        let reloader = tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                injector.update_policy(config.faults);
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        reloader.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the demo router with all middleware layers.
///
/// Layer order, outermost first: timeout, interceptor, body limit, handler.
/// A timed-out request is dropped inside the interceptor and recorded as
/// cancelled.
#[allow(deprecated)]
pub fn build_router(config: &AppConfig, state: AppState, instrumentation: Instrumentation) -> Router {
    let routes = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/api/data", get(handlers::data))
        .route("/api/error-test", get(handlers::error_test))
        .route("/items/{id}", get(handlers::item))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(config.listener.max_body_size));

    instrument(routes, instrumentation).layer(TimeoutLayer::new(Duration::from_secs(
        config.timeouts.request_secs,
    )))
}

/// Router exposing `GET /metrics`.
pub fn metrics_router(registry: MetricsRegistry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry)
}

async fn metrics_handler(State(registry): State<MetricsRegistry>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], registry.snapshot())
}

/// Serve the metrics endpoint until `shutdown` fires.
pub async fn serve_metrics(
    listener: TcpListener,
    registry: MetricsRegistry,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    axum::serve(listener, metrics_router(registry))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FaultConfig, FaultRates};
    use crate::observability::metrics::{ERROR_COUNT, REQUEST_COUNT};
    use crate::observability::{LogSink, MemoryLog};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn quiet_config() -> AppConfig {
        AppConfig {
            faults: FaultConfig::disabled(),
            workload: WorkloadConfig::instant(),
            ..AppConfig::default()
        }
    }

    fn server(config: &AppConfig) -> (HttpServer, MetricsRegistry, MemoryLog) {
        let registry = MetricsRegistry::for_requests(100).unwrap();
        let (sink, log) = LogSink::memory(&registry);
        let server = HttpServer::new(config, Instrumentation::new(registry.clone(), sink));
        (server, registry, log)
    }

    async fn call(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_demo_endpoints() {
        let (server, _, _) = server(&quiet_config());
        let app = server.router();

        let (status, body) = call(&app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Hello World!");

        let (status, body) = call(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = call(&app, "/api/data").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"].as_array().unwrap().len(), 3);

        let (status, body) = call(&app, "/items/7").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Item 7");

        let (status, _) = call(&app, "/items/seven").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_error_test_endpoint() {
        let (server, registry, log) = server(&quiet_config());
        let app = server.router();

        let (status, body) = call(&app, "/api/error-test?type=key_error").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"].as_str().unwrap().contains("key error"));
        assert_eq!(
            registry.counter_value(
                ERROR_COUNT,
                &[("endpoint", "/api/error-test"), ("error_type", "key_error")]
            ),
            Some(1)
        );

        let (status, _) = call(&app, "/api/error-test").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, _) = call(&app, "/api/error-test?type=nope").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn test_fault_hint_and_policy_reload() {
        let (server, registry, _) = server(&quiet_config());
        let app = server.router();

        let (status, _) = call(&app, "/items/1?fault=server_error").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            registry.counter_value(
                ERROR_COUNT,
                &[("endpoint", "/items/{id}"), ("error_type", "injected_fault")]
            ),
            Some(1)
        );

        let mut policy = FaultConfig::disabled();
        policy
            .endpoints
            .insert("/health".into(), FaultRates::server_error(1.0, 503));
        server.injector().update_policy(policy);

        let (status, body) = call(&app, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["detail"], "Service temporarily unavailable");
        assert_eq!(
            registry.counter_value(
                REQUEST_COUNT,
                &[("method", "GET"), ("endpoint", "/health"), ("status", "503")]
            ),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (server, registry, _) = server(&quiet_config());
        call(&server.router(), "/items/3").await;

        let response = metrics_router(registry)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], METRICS_CONTENT_TYPE);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains(
            "request_count_total{method=\"GET\",endpoint=\"/items/{id}\",status=\"200\"} 1"
        ));
    }
}
