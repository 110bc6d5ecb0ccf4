//! Request-level observability demo library
//!
//! Instrumentation core (correlation context, metrics registry, request
//! interceptor), a fault injector, the demo HTTP service built on them, and a
//! synthetic traffic generator to drive it.

pub mod config;
pub mod faults;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod traffic;

pub use config::AppConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use observability::MetricsRegistry;
