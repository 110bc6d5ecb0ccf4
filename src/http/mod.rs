//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, timeout + body limit layers)
//!     → interceptor.rs (timer, correlation context, outcome, metrics, LogEvent)
//!     → handlers.rs (fault gate, simulated work)
//!     → error.rs (AppError → JSON error body + error_type extension)
//!     → Send to client (traceparent / x-trace-id echoed)
//! ```

pub mod error;
pub mod handlers;
pub mod interceptor;
pub mod server;

pub use error::{AppError, ErrorInfo, Outcome};
pub use interceptor::{instrument, Instrumentation, RequestPhase, RequestRecord};
pub use server::{build_router, metrics_router, serve_metrics, AppState, HttpServer};
