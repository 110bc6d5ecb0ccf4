//! Error injection subsystem.
//!
//! # Data Flow
//! ```text
//! Handler entry (http::handlers)
//!     → types.rs (RequestFeatures from ?fault= / x-fault)
//!     → injector.rs (FaultPolicy lookup by route template, seeded draw)
//!     → InjectedFault
//!         None         → normal business logic
//!         Latency(d)   → tokio::time::sleep(d), then normal logic
//!         ClientError  → 4xx, business logic skipped
//!         ServerError  → 5xx, business logic skipped
//! ```
//!
//! # Design Decisions
//! - Decisions are independent per request
//! - Seeded RNG makes decision sequences reproducible in tests
//! - Injected latency is a cooperative suspension, never a blocking sleep

pub mod injector;
pub mod types;

pub use injector::FaultInjector;
pub use types::{FaultKind, InjectedFault, RequestFeatures, FAULT_PARAM, X_FAULT};
