use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use url::Url;

use monitoring_demo::config::ObservabilityConfig;
use monitoring_demo::faults::FaultKind;
use monitoring_demo::lifecycle::{spawn_signal_handler, Shutdown};
use monitoring_demo::observability::init_tracing;
use monitoring_demo::traffic::{self, EndpointWeight, TrafficConfig};

#[derive(Parser)]
#[command(name = "traffic-gen")]
#[command(about = "Synthetic traffic generator for the monitoring demo", long_about = None)]
struct Cli {
    /// Base URL of the target service.
    #[arg(short, long, default_value = "http://localhost:8000")]
    url: Url,

    /// Requests per second across all issuers.
    #[arg(short, long, default_value_t = 10.0)]
    rate: f64,

    /// Run duration in seconds.
    #[arg(short, long, default_value_t = 60.0)]
    duration: f64,

    /// Endpoint mix entry, PATH=WEIGHT (repeatable). Defaults to /, /api/data and /health.
    #[arg(short, long = "endpoint", value_name = "PATH=WEIGHT")]
    endpoints: Vec<EndpointWeight>,

    /// Share of requests that ask the target for a fault (0..=1).
    #[arg(long, default_value_t = 0.0)]
    fault_fraction: f64,

    /// Fault requested by fault-triggering requests.
    #[arg(long, default_value = "server_error")]
    fault_kind: FaultKind,

    /// Seed for endpoint and fault selection.
    #[arg(long)]
    seed: Option<u64>,

    /// Number of independent issuers.
    #[arg(long, default_value_t = 5)]
    issuers: usize,

    /// Requests one issuer may have in flight.
    #[arg(long, default_value_t = 1)]
    burst: usize,

    /// Per-request timeout in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    /// Time in-flight requests get to finish after Ctrl+C, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    drain_ms: u64,

    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn into_config(self) -> Result<(TrafficConfig, bool), String> {
        if self.duration <= 0.0 {
            return Err("invalid duration: must be a positive number of seconds".to_string());
        }
        let duration = Duration::try_from_secs_f64(self.duration)
            .map_err(|e| format!("invalid duration: {}", e))?;
        let mut config = TrafficConfig::new(self.url);
        config.rate = self.rate;
        config.duration = duration;
        if !self.endpoints.is_empty() {
            config.endpoints = self.endpoints;
        }
        config.fault_fraction = self.fault_fraction;
        config.fault_kind = self.fault_kind;
        config.seed = self.seed;
        config.issuers = self.issuers;
        config.burst = self.burst;
        config.request_timeout = Duration::from_millis(self.timeout_ms);
        config.drain_timeout = Duration::from_millis(self.drain_ms);
        Ok((config, self.json))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&ObservabilityConfig::default());

    let (config, json) = match cli.into_config() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let client = match config.client() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let summary = match traffic::run(config, client, shutdown.subscribe()).await {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if json {
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: failed to render summary: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{}", summary);
    }
    ExitCode::SUCCESS
}
