//! Traffic generator configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::faults::FaultKind;

/// Errors that stop a run from starting.
#[derive(Debug, thiserror::Error)]
pub enum TrafficError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid endpoint '{0}' (expected PATH or PATH=WEIGHT)")]
    InvalidEndpoint(String),

    #[error("target {url} unreachable: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("issuer task failed: {0}")]
    IssuerFailed(#[from] tokio::task::JoinError),
}

impl TrafficError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        TrafficError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// One entry of the endpoint mix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointWeight {
    /// Path or route template, e.g. `/items/{id}`.
    pub path: String,
    pub weight: u32,
}

impl EndpointWeight {
    pub fn new(path: impl Into<String>, weight: u32) -> Self {
        Self {
            path: path.into(),
            weight,
        }
    }
}

impl FromStr for EndpointWeight {
    type Err = TrafficError;

    /// `PATH=WEIGHT`, or just `PATH` for weight 1.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (path, weight) = match s.rsplit_once('=') {
            Some((path, weight)) => {
                let weight = weight
                    .trim()
                    .parse()
                    .map_err(|_| TrafficError::InvalidEndpoint(s.to_string()))?;
                (path.trim(), weight)
            }
            None => (s, 1),
        };
        if !path.starts_with('/') || path.contains('?') {
            return Err(TrafficError::InvalidEndpoint(s.to_string()));
        }
        Ok(Self::new(path, weight))
    }
}

impl fmt::Display for EndpointWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.path, self.weight)
    }
}

/// Shape of one generator run.
#[derive(Debug, Clone)]
pub struct TrafficConfig {
    pub base_url: Url,
    /// Target requests per second across all issuers.
    pub rate: f64,
    pub duration: Duration,
    pub endpoints: Vec<EndpointWeight>,
    /// Share of requests that ask the target for a fault.
    pub fault_fraction: f64,
    pub fault_kind: FaultKind,
    pub seed: Option<u64>,
    pub issuers: usize,
    /// Requests one issuer may have in flight; 1 means sequential.
    pub burst: usize,
    pub request_timeout: Duration,
    /// How long in-flight requests may finish after an interrupt.
    pub drain_timeout: Duration,
}

impl TrafficConfig {
    /// Defaults: 10 req/s for 60 s over `/`, `/api/data` and `/health`,
    /// five sequential issuers, no faults.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            rate: 10.0,
            duration: Duration::from_secs(60),
            endpoints: vec![
                EndpointWeight::new("/", 1),
                EndpointWeight::new("/api/data", 1),
                EndpointWeight::new("/health", 1),
            ],
            fault_fraction: 0.0,
            fault_kind: FaultKind::ServerError,
            seed: None,
            issuers: 5,
            burst: 1,
            request_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(5),
        }
    }

    /// Total number of requests the run aims to issue.
    pub fn quota(&self) -> u64 {
        (self.rate * self.duration.as_secs_f64()).round() as u64
    }

    /// Time between two requests of one issuer (`issuers / rate`).
    pub fn period(&self) -> Result<Duration, TrafficError> {
        let period = Duration::try_from_secs_f64(self.issuers as f64 / self.rate)
            .map_err(|e| TrafficError::invalid("rate", format!("issuer period out of range: {}", e)))?;
        if period.is_zero() {
            return Err(TrafficError::invalid(
                "rate",
                format!("too high for {} issuers (period below 1ns)", self.issuers),
            ));
        }
        Ok(period)
    }

    /// HTTP client for the run. Connection attempts share the request timeout.
    pub fn client(&self) -> Result<reqwest::Client, TrafficError> {
        Ok(reqwest::Client::builder()
            .connect_timeout(self.request_timeout)
            .build()?)
    }

    pub fn validate(&self) -> Result<(), TrafficError> {
        if !matches!(self.base_url.scheme(), "http" | "https") {
            return Err(TrafficError::invalid(
                "url",
                format!("scheme '{}' is not http or https", self.base_url.scheme()),
            ));
        }
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(TrafficError::invalid("rate", "must be a positive number"));
        }
        if self.duration.is_zero() {
            return Err(TrafficError::invalid("duration", "must be > 0"));
        }
        if self.endpoints.is_empty() {
            return Err(TrafficError::invalid("endpoints", "at least one endpoint is required"));
        }
        if self.endpoints.iter().all(|e| e.weight == 0) {
            return Err(TrafficError::invalid("endpoints", "at least one weight must be > 0"));
        }
        if let Some(bad) = self
            .endpoints
            .iter()
            .find(|e| !e.path.starts_with('/') || e.path.contains('?'))
        {
            return Err(TrafficError::InvalidEndpoint(bad.path.clone()));
        }
        if !(0.0..=1.0).contains(&self.fault_fraction) {
            return Err(TrafficError::invalid("fault_fraction", "must be within [0, 1]"));
        }
        if self.issuers == 0 {
            return Err(TrafficError::invalid("issuers", "must be >= 1"));
        }
        if self.burst == 0 {
            return Err(TrafficError::invalid("burst", "must be >= 1"));
        }
        if self.request_timeout.is_zero() {
            return Err(TrafficError::invalid("timeout", "must be > 0"));
        }
        if self.quota() == 0 {
            return Err(TrafficError::invalid(
                "duration",
                "rate * duration rounds to zero requests",
            ));
        }
        self.period()?;
        Ok(())
    }
}
