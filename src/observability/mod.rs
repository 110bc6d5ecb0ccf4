//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every request (http::interceptor) produces:
//!     → context.rs (trace/span ids, inherited from `traceparent`)
//!     → metrics.rs (counters, histograms)
//!     → logging.rs (one JSON LogEvent carrying the trace/span ids)
//!
//! Consumers:
//!     → Metrics endpoint (Prometheus scrape of MetricsRegistry::snapshot)
//!     → Log aggregation (JSON lines on stdout or file)
//!     → Downstream services (propagated `traceparent`)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Trace id flows through logs and response headers
//! - Metrics are cheap (atomic increments, sharded maps)
//! - Registry is an explicit handle, never an ambient global

pub mod context;
pub mod logging;
pub mod metrics;

pub use context::CorrelationContext;
pub use logging::{init_tracing, Level, LogEvent, LogSink, MemoryLog};
pub use metrics::MetricsRegistry;
