//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, probabilities in [0, 1])
//! - Check addresses parse before any listener is bound
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system (startup and reload)

use std::net::SocketAddr;

use crate::config::schema::{AppConfig, FaultRates};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Validate the whole configuration, collecting every error.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_body_size == 0 {
        errors.push(ValidationError::new("listener.max_body_size", "must be > 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }
    if obs.max_series_per_family == 0 {
        errors.push(ValidationError::new(
            "observability.max_series_per_family",
            "must be > 0",
        ));
    }
    if obs.event_buffer == 0 {
        errors.push(ValidationError::new("observability.event_buffer", "must be > 0"));
    }

    validate_rates("faults.default", &config.faults.default, &mut errors);
    for (endpoint, rates) in &config.faults.endpoints {
        if !endpoint.starts_with('/') {
            errors.push(ValidationError::new(
                format!("faults.endpoints.{endpoint}"),
                "route template must start with '/'",
            ));
        }
        validate_rates(&format!("faults.endpoints.{endpoint}"), rates, &mut errors);
    }

    if config.workload.min_work_ms > config.workload.max_work_ms {
        errors.push(ValidationError::new(
            "workload",
            "min_work_ms must not exceed max_work_ms",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate one fault probability table.
pub fn validate_rates(prefix: &str, rates: &FaultRates, errors: &mut Vec<ValidationError>) {
    for (name, p) in [
        ("latency", rates.latency),
        ("client_error", rates.client_error),
        ("server_error", rates.server_error),
    ] {
        if !(0.0..=1.0).contains(&p) {
            errors.push(ValidationError::new(
                format!("{prefix}.{name}"),
                format!("probability {p} outside [0, 1]"),
            ));
        }
    }
    let total = rates.latency + rates.client_error + rates.server_error;
    if total > 1.0 + f64::EPSILON {
        errors.push(ValidationError::new(
            prefix,
            format!("probabilities sum to {total}, must be <= 1"),
        ));
    }
    if rates.latency_min_ms > rates.latency_max_ms {
        errors.push(ValidationError::new(
            format!("{prefix}.latency_min_ms"),
            "must not exceed latency_max_ms",
        ));
    }
    if !(400..500).contains(&rates.client_status) {
        errors.push(ValidationError::new(
            format!("{prefix}.client_status"),
            format!("{} is not a 4xx status", rates.client_status),
        ));
    }
    if !(500..600).contains(&rates.server_status) {
        errors.push(ValidationError::new(
            format!("{prefix}.server_status"),
            format!("{} is not a 5xx status", rates.server_status),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&AppConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = AppConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.timeouts.request_secs = 0;
        config.faults.default.server_error = 1.5;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"listener.bind_address"));
        assert!(fields.contains(&"timeouts.request_secs"));
        assert!(fields.contains(&"faults.default.server_error"));
        // 1.5 alone also breaks the sum rule
        assert!(fields.contains(&"faults.default"));
    }

    #[test]
    fn test_rejects_wrong_status_class() {
        let mut config = AppConfig::default();
        config
            .faults
            .endpoints
            .insert("/items/{id}".into(), FaultRates::server_error(0.1, 404));

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "faults.endpoints./items/{id}.server_status");
    }
}
