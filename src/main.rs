//! Request-level observability demo service
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                  MONITORING DEMO                     │
//!                     │                                                      │
//!  traffic-gen ──────▶│  timeout ─▶ interceptor ─▶ body limit ─▶ handlers    │
//!                     │               │    ▲                       │         │
//!                     │               │    └── AppError / panic ───┘         │
//!                     │               │                 │                    │
//!                     │               ▼                 ▼                    │
//!                     │      ┌────────────────┐  ┌──────────────┐            │
//!                     │      │MetricsRegistry │  │FaultInjector │◀─ config   │
//!                     │      └───────┬────────┘  └──────────────┘   watcher  │
//!                     │              │                                       │
//!                     │              ▼            LogSink ─▶ JSON lines      │
//!  scraper ◀──────────┼──── GET /metrics (metrics_address)                   │
//!                     └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use monitoring_demo::config::{load_config, AppConfig, ConfigWatcher};
use monitoring_demo::http::{serve_metrics, HttpServer, Instrumentation};
use monitoring_demo::lifecycle::{spawn_signal_handler, Shutdown};
use monitoring_demo::observability::{init_tracing, LogSink, MetricsRegistry};

#[derive(Parser)]
#[command(name = "monitoring-demo")]
#[command(about = "Instrumented demo HTTP service", long_about = None)]
struct Cli {
    /// TOML configuration file; watched for fault policy changes.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    init_tracing(&config.observability);
    tracing::info!("monitoring-demo v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        metrics_address = %config.observability.metrics_address,
        request_timeout_secs = config.timeouts.request_secs,
        fault_endpoints = config.faults.endpoints.len(),
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let registry = MetricsRegistry::for_requests(config.observability.max_series_per_family)?;
    let (sink, writer) = LogSink::spawn(
        &config.observability.event_log,
        config.observability.event_buffer,
        &registry,
    )?;

    // Initialize metrics endpoint
    let metrics_task = if config.observability.metrics_enabled {
        let listener = TcpListener::bind(&config.observability.metrics_address).await?;
        let registry = registry.clone();
        let rx = shutdown.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = serve_metrics(listener, registry, rx).await {
                tracing::error!(error = %e, "Metrics endpoint failed");
            }
        }))
    } else {
        None
    };

    // Hot reload of the fault policy
    let (_watcher, config_updates) = match &cli.config {
        Some(path) => {
            let (watcher, rx) = ConfigWatcher::new(path, config.clone());
            match watcher.run() {
                Ok(handle) => (Some(handle), rx),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    (None, rx)
                }
            }
        }
        None => (None, mpsc::unbounded_channel().1),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(&config, Instrumentation::new(registry, sink));
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    if let Some(task) = metrics_task {
        let _ = task.await;
    }
    // The server owned the last sink handles; wait for the writer to flush.
    if let Some(writer) = writer {
        let _ = writer.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
