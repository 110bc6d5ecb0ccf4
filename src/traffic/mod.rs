//! Synthetic traffic generation.
//!
//! # Data Flow
//! ```text
//! traffic-gen CLI (bin/traffic-gen.rs)
//!     → config.rs (TrafficConfig, validated)
//!     → generator.rs
//!         probe GET {url}/health
//!         N issuers, each paced at issuers/rate seconds
//!             pick endpoint by weight, fill {id}, maybe add ?fault=<kind>
//!             send (sequential, or up to `burst` in flight)
//!     → summary.rs (per-issuer Tally merged into RunSummary)
//! ```
//!
//! # Design Decisions
//! - Individual request failures are counted, never fatal
//! - Interrupt stops issuing; in-flight requests drain or are abandoned

pub mod config;
pub mod generator;
pub mod summary;

pub use config::{EndpointWeight, TrafficConfig, TrafficError};
pub use generator::{probe, run};
pub use summary::{LatencySummary, RunSummary};
