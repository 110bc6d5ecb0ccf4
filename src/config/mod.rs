//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → handed to the server at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → watcher.rs diffs the fault table against the running one
//!     → server swaps the fault policy (ArcSwap) when it changed
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only the fault policy is hot-swapped
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::AppConfig;
pub use schema::{
    EventLogTarget, FaultConfig, FaultRates, ListenerConfig, LogFormat, ObservabilityConfig,
    TimeoutConfig, WorkloadConfig,
};
pub use watcher::{fault_changes, ChangeKind, ConfigWatcher, FaultChange};
