//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the demo service.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the monitoring demo service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address, body limits).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings (diagnostics, metrics endpoint, event log).
    pub observability: ObservabilityConfig,

    /// Error injection policy.
    pub faults: FaultConfig,

    /// Simulated handler work.
    pub workload: WorkloadConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,

    /// Maximum accepted request body in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    /// Requests exceeding it are recorded as cancelled.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Diagnostic log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Where request log events are written.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase", tag = "kind", content = "path")]
pub enum EventLogTarget {
    /// One JSON object per line on stdout.
    #[default]
    Stdout,
    /// Append-only file.
    File(String),
    /// Event emission disabled.
    Disabled,
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level for diagnostics (trace, debug, info, warn, error).
    pub log_level: String,

    /// Diagnostic log format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Upper bound on series per metric family.
    pub max_series_per_family: usize,

    /// Request event log destination.
    pub event_log: EventLogTarget,

    /// Capacity of the buffer between request tasks and the event writer.
    pub event_buffer: usize,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
            max_series_per_family: 1000,
            event_log: EventLogTarget::Stdout,
            event_buffer: 4096,
        }
    }
}

/// Fault probabilities for one endpoint (or the default for all endpoints).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FaultRates {
    /// Probability of an injected delay.
    pub latency: f64,

    /// Probability of an injected 4xx response.
    pub client_error: f64,

    /// Probability of an injected 5xx response.
    pub server_error: f64,

    /// Injected delay range in milliseconds (inclusive).
    pub latency_min_ms: u64,
    pub latency_max_ms: u64,

    /// Status returned for injected client errors.
    pub client_status: u16,

    /// Status returned for injected server errors.
    pub server_status: u16,
}

impl FaultRates {
    /// Rates that never inject anything.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn server_error(probability: f64, status: u16) -> Self {
        Self {
            server_error: probability,
            server_status: status,
            ..Self::default()
        }
    }

    pub fn client_error(probability: f64, status: u16) -> Self {
        Self {
            client_error: probability,
            client_status: status,
            ..Self::default()
        }
    }
}

impl Default for FaultRates {
    fn default() -> Self {
        Self {
            latency: 0.0,
            client_error: 0.0,
            server_error: 0.0,
            latency_min_ms: 100,
            latency_max_ms: 1000,
            client_status: 404,
            server_status: 500,
        }
    }
}

/// Error injection configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FaultConfig {
    /// Seed for reproducible fault decisions. Random when absent.
    pub seed: Option<u64>,

    /// Rates applied to endpoints without an override.
    pub default: FaultRates,

    /// Per route-template overrides (e.g. "/api/data").
    pub endpoints: BTreeMap<String, FaultRates>,
}

impl FaultConfig {
    /// A policy that injects nothing.
    pub fn disabled() -> Self {
        Self {
            seed: None,
            default: FaultRates::none(),
            endpoints: BTreeMap::new(),
        }
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        let mut endpoints = BTreeMap::new();
        endpoints.insert("/".to_string(), FaultRates::server_error(0.2, 500));
        endpoints.insert("/health".to_string(), FaultRates::server_error(0.1, 503));
        endpoints.insert("/api/data".to_string(), FaultRates::client_error(0.15, 404));
        Self {
            seed: None,
            default: FaultRates::none(),
            endpoints,
        }
    }
}

/// Simulated processing time for the demo handlers.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub min_work_ms: u64,
    pub max_work_ms: u64,
}

impl WorkloadConfig {
    /// No simulated work; handlers answer immediately.
    pub fn instant() -> Self {
        Self {
            min_work_ms: 0,
            max_work_ms: 0,
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            min_work_ms: 100,
            max_work_ms: 500,
        }
    }
}
