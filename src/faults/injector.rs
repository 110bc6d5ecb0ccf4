//! Probabilistic fault selection.
//!
//! # Responsibilities
//! - Pick at most one fault per request from the endpoint's probability table
//! - Honour explicit fault hints from the caller
//! - Stay reproducible when seeded
//!
//! # Design Decisions
//! - One uniform draw per request: server error band, then client error band,
//!   then latency band, remainder is no fault
//! - Policy swapped atomically on config reload; the RNG stream continues

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{FaultConfig, FaultRates};
use crate::faults::types::{FaultKind, InjectedFault, RequestFeatures};

/// Decides which fault, if any, a request should suffer.
#[derive(Debug)]
pub struct FaultInjector {
    policy: ArcSwap<FaultConfig>,
    rng: Mutex<StdRng>,
}

impl FaultInjector {
    pub fn new(policy: FaultConfig) -> Self {
        let rng = match policy.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            policy: ArcSwap::from_pointee(policy),
            rng: Mutex::new(rng),
        }
    }

    /// An injector that never injects.
    pub fn disabled() -> Self {
        Self::new(FaultConfig::disabled())
    }

    /// Current policy.
    pub fn policy(&self) -> Arc<FaultConfig> {
        self.policy.load_full()
    }

    /// Replace the probability table. The seed of the new policy is ignored.
    pub fn update_policy(&self, policy: FaultConfig) {
        tracing::info!(
            endpoints = policy.endpoints.len(),
            default_server_error = policy.default.server_error,
            default_client_error = policy.default.client_error,
            default_latency = policy.default.latency,
            "Fault policy updated"
        );
        self.policy.store(Arc::new(policy));
    }

    /// Choose the fault for one request to `endpoint` (a route template).
    pub fn decide(&self, endpoint: &str, features: &RequestFeatures) -> InjectedFault {
        let policy = self.policy.load();
        let rates = policy.endpoints.get(endpoint).unwrap_or(&policy.default);
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

        let kind = match features.fault_hint {
            Some(hint) => hint,
            None => {
                let draw: f64 = rng.gen();
                pick_kind(rates, draw)
            }
        };

        match kind {
            FaultKind::None => InjectedFault::None,
            FaultKind::ServerError => InjectedFault::ServerError {
                status: rates.server_status,
            },
            FaultKind::ClientError => InjectedFault::ClientError {
                status: rates.client_status,
            },
            FaultKind::Latency => {
                let (lo, hi) = ordered(rates.latency_min_ms, rates.latency_max_ms);
                InjectedFault::Latency(Duration::from_millis(rng.gen_range(lo..=hi)))
            }
        }
    }
}

fn pick_kind(rates: &FaultRates, draw: f64) -> FaultKind {
    let server = rates.server_error;
    let client = server + rates.client_error;
    let latency = client + rates.latency;
    if draw < server {
        FaultKind::ServerError
    } else if draw < client {
        FaultKind::ClientError
    } else if draw < latency {
        FaultKind::Latency
    } else {
        FaultKind::None
    }
}

fn ordered(a: u64, b: u64) -> (u64, u64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
