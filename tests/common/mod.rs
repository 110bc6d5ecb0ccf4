//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use monitoring_demo::config::{AppConfig, FaultConfig, WorkloadConfig};
use monitoring_demo::http::{serve_metrics, HttpServer, Instrumentation};
use monitoring_demo::lifecycle::Shutdown;
use monitoring_demo::observability::{LogSink, MemoryLog, MetricsRegistry};

/// A demo service running on an ephemeral port.
pub struct TestService {
    pub addr: SocketAddr,
    pub metrics_addr: SocketAddr,
    pub registry: MetricsRegistry,
    pub log: MemoryLog,
    pub shutdown: Shutdown,
    pub config_tx: mpsc::UnboundedSender<AppConfig>,
}

impl TestService {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn base_url(&self) -> url::Url {
        url::Url::parse(&format!("http://{}", self.addr)).unwrap()
    }
}

/// Config with no faults and no simulated work.
pub fn quiet_config() -> AppConfig {
    AppConfig {
        faults: FaultConfig::disabled(),
        workload: WorkloadConfig::instant(),
        ..AppConfig::default()
    }
}

/// Start the instrumented service (and its metrics listener) on 127.0.0.1:0.
pub async fn start_service(config: AppConfig) -> TestService {
    let registry = MetricsRegistry::for_requests(config.observability.max_series_per_family).unwrap();
    let (sink, log) = LogSink::memory(&registry);
    let shutdown = Shutdown::new();
    let (config_tx, config_updates) = mpsc::unbounded_channel();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(&config, Instrumentation::new(registry.clone(), sink));
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    let metrics_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let metrics_addr = metrics_listener.local_addr().unwrap();
    let metrics_registry = registry.clone();
    let metrics_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = serve_metrics(metrics_listener, metrics_registry, metrics_shutdown).await;
    });

    TestService {
        addr,
        metrics_addr,
        registry,
        log,
        shutdown,
        config_tx,
    }
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// An address that accepts connections and never answers.
pub async fn silent_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
