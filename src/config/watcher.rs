//! Configuration file watcher for hot reload of the fault policy.
//!
//! Only `[faults]` is applied at runtime (minus its seed). A reload whose fault
//! table is unchanged is not forwarded; changes to any other section are
//! reported and keep their running values until restart.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::{AppConfig, FaultConfig};

/// Label used for the default rates in change reports.
const DEFAULT_RATES: &str = "default";

/// What happened to one entry of the fault table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    Updated,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
            ChangeKind::Updated => "updated",
        })
    }
}

/// One changed entry: a route template, or `default`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultChange {
    pub endpoint: String,
    pub kind: ChangeKind,
}

/// Entries that differ between two fault tables, default rates first.
pub fn fault_changes(old: &FaultConfig, new: &FaultConfig) -> Vec<FaultChange> {
    let mut changes = Vec::new();
    if old.default != new.default {
        changes.push(FaultChange {
            endpoint: DEFAULT_RATES.to_string(),
            kind: ChangeKind::Updated,
        });
    }
    for (endpoint, rates) in &new.endpoints {
        let kind = match old.endpoints.get(endpoint) {
            None => ChangeKind::Added,
            Some(previous) if previous != rates => ChangeKind::Updated,
            Some(_) => continue,
        };
        changes.push(FaultChange {
            endpoint: endpoint.clone(),
            kind,
        });
    }
    for endpoint in old.endpoints.keys() {
        if !new.endpoints.contains_key(endpoint) {
            changes.push(FaultChange {
                endpoint: endpoint.clone(),
                kind: ChangeKind::Removed,
            });
        }
    }
    changes
}

/// Settings in `next` that differ from the running config but cannot be hot-applied.
fn restart_sections(running: &AppConfig, next: &AppConfig) -> Vec<&'static str> {
    let mut sections = Vec::new();
    if running.listener != next.listener {
        sections.push("listener");
    }
    if running.timeouts != next.timeouts {
        sections.push("timeouts");
    }
    if running.observability != next.observability {
        sections.push("observability");
    }
    if running.workload != next.workload {
        sections.push("workload");
    }
    if running.faults.seed != next.faults.seed {
        sections.push("faults.seed");
    }
    sections
}

/// Fold a freshly loaded config into the running one.
///
/// Returns the config to forward when the fault table changed.
fn apply_reload(running: &mut AppConfig, next: AppConfig) -> Option<AppConfig> {
    let pending = restart_sections(running, &next);
    if !pending.is_empty() {
        tracing::warn!(sections = ?pending, "Config changes that need a restart were not applied");
    }

    let changes = fault_changes(&running.faults, &next.faults);
    if changes.is_empty() {
        tracing::debug!("Config file touched, fault policy unchanged");
        return None;
    }
    for change in &changes {
        tracing::info!(endpoint = %change.endpoint, change = %change.kind, "Fault policy entry changed");
    }

    running.faults.default = next.faults.default;
    running.faults.endpoints = next.faults.endpoints;
    Some(running.clone())
}

/// A watcher that monitors the configuration file for fault policy changes.
pub struct ConfigWatcher {
    path: PathBuf,
    running: AppConfig,
    update_tx: mpsc::UnboundedSender<AppConfig>,
}

impl ConfigWatcher {
    /// Create a watcher for `path`, starting from the config the service runs with.
    ///
    /// Returns the watcher and a receiver for validated configs whose fault
    /// table changed.
    pub fn new(path: &Path, running: AppConfig) -> (Self, mpsc::UnboundedReceiver<AppConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                running,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            path,
            mut running,
            update_tx,
        } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match load_config(&watched) {
                        Ok(next) => {
                            if let Some(updated) = apply_reload(&mut running, next) {
                                let _ = update_tx.send(updated);
                            }
                        }
                        Err(e) => {
                            tracing::error!(path = ?watched, error = %e, "Config reload rejected, keeping current fault policy");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Fault policy watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::FaultRates;

    #[test]
    fn test_fault_changes() {
        let old = FaultConfig::default();
        let mut new = old.clone();
        assert!(fault_changes(&old, &new).is_empty());

        new.default = FaultRates::server_error(0.05, 500);
        new.endpoints.remove("/health");
        new.endpoints
            .insert("/api/data".to_string(), FaultRates::client_error(0.5, 404));
        new.endpoints
            .insert("/items/{id}".to_string(), FaultRates::server_error(0.3, 502));

        let changes = fault_changes(&old, &new);
        let by_endpoint = |endpoint: &str| {
            changes
                .iter()
                .find(|c| c.endpoint == endpoint)
                .map(|c| c.kind)
        };
        assert_eq!(changes.len(), 4);
        assert_eq!(changes[0].endpoint, "default");
        assert_eq!(by_endpoint("default"), Some(ChangeKind::Updated));
        assert_eq!(by_endpoint("/api/data"), Some(ChangeKind::Updated));
        assert_eq!(by_endpoint("/items/{id}"), Some(ChangeKind::Added));
        assert_eq!(by_endpoint("/health"), Some(ChangeKind::Removed));
        assert_eq!(by_endpoint("/"), None);
    }

    #[test]
    fn test_unchanged_faults_are_not_forwarded() {
        let mut running = AppConfig::default();
        let mut next = running.clone();
        next.workload.max_work_ms = 9_000;
        next.faults.seed = Some(42);

        assert!(apply_reload(&mut running, next).is_none());
        assert_eq!(running.workload.max_work_ms, 500);
        assert_eq!(running.faults.seed, None);
    }

    #[test]
    fn test_reload_applies_only_fault_table() {
        let mut running = AppConfig::default();
        let mut next = running.clone();
        next.listener.bind_address = "127.0.0.1:1".to_string();
        next.faults = FaultConfig::disabled();
        next.faults.seed = Some(7);

        let forwarded = apply_reload(&mut running, next).unwrap();
        assert!(forwarded.faults.endpoints.is_empty());
        assert_eq!(forwarded.faults.seed, None);
        assert_eq!(forwarded.listener.bind_address, "0.0.0.0:8000");
        assert_eq!(running, forwarded);

        // Same table again: nothing to forward.
        let mut again = running.clone();
        again.faults = FaultConfig::disabled();
        assert!(apply_reload(&mut running, again).is_none());
    }
}
