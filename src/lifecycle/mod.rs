//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → HTTP server stops accepting, drains
//!               → metrics listener stops
//!               → traffic issuers stop issuing, drain or abandon
//! ```
//!
//! # Design Decisions
//! - One broadcast channel; every long-running task subscribes
//! - The request event writer ends after the last sink handle is dropped

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{spawn_signal_handler, wait_for_signal};
