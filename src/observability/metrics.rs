//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Declare metric families with a fixed label schema
//! - Accumulate counters and histograms from many concurrent requests
//! - Render a Prometheus-compatible text snapshot for scraping
//!
//! # Metrics
//! - `request_count_total` (counter): requests by method, endpoint, status
//! - `request_latency_seconds` (histogram): latency by method, endpoint
//! - `error_count_total` (counter): client/server errors by endpoint, error type
//! - `request_cancelled_total` (counter): requests dropped before completion
//! - `instrumentation_errors_total` (counter): failures inside this module
//! - `log_events_dropped_total` (counter): events lost to a full log buffer
//!
//! # Design Decisions
//! - No global lock: families and series live in sharded `DashMap`s
//! - Counters are lock-free atomics
//! - Each histogram series has its own mutex so (buckets, count, sum) are
//!   always read together; snapshots never freeze the whole registry
//! - Bad label sets are reported and turned into no-ops, never raised

use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;

pub const REQUEST_COUNT: &str = "request_count_total";
pub const REQUEST_LATENCY: &str = "request_latency_seconds";
pub const ERROR_COUNT: &str = "error_count_total";
pub const REQUEST_CANCELLED: &str = "request_cancelled_total";
pub const INSTRUMENTATION_ERRORS: &str = "instrumentation_errors_total";
pub const LOG_EVENTS_DROPPED: &str = "log_events_dropped_total";

/// Latency buckets in seconds, tuned for typical web latencies.
pub const DEFAULT_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

/// Default cap on distinct label combinations per family.
pub const DEFAULT_MAX_SERIES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Histogram,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Counter => f.write_str("counter"),
            MetricKind::Histogram => f.write_str("histogram"),
        }
    }
}

/// Failures inside the registry itself.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricsError {
    #[error("metric '{name}' declares labels {expected:?}, got {got:?}")]
    LabelMismatch {
        name: String,
        expected: Vec<String>,
        got: Vec<String>,
    },
    #[error("metric '{name}' is already registered with a different schema")]
    SchemaConflict { name: String },
    #[error("metric '{name}' is a {actual}, not a {requested}")]
    KindMismatch {
        name: String,
        actual: MetricKind,
        requested: MetricKind,
    },
    #[error("metric '{name}' reached its limit of {limit} series")]
    CardinalityExceeded { name: String, limit: usize },
    #[error("invalid metric or label name '{0}'")]
    InvalidName(String),
    #[error("invalid buckets for '{name}': {reason}")]
    InvalidBuckets { name: String, reason: &'static str },
    #[error("histogram '{name}' rejected non-finite observation")]
    InvalidObservation { name: String },
}

impl MetricsError {
    /// Bounded label value for `instrumentation_errors_total{kind}`.
    pub fn kind(&self) -> &'static str {
        match self {
            MetricsError::LabelMismatch { .. } => "label_mismatch",
            MetricsError::SchemaConflict { .. } => "schema_conflict",
            MetricsError::KindMismatch { .. } => "kind_mismatch",
            MetricsError::CardinalityExceeded { .. } => "cardinality_exceeded",
            MetricsError::InvalidName(_) => "invalid_name",
            MetricsError::InvalidBuckets { .. } => "invalid_buckets",
            MetricsError::InvalidObservation { .. } => "invalid_observation",
        }
    }
}

#[derive(Debug, Default)]
struct HistogramState {
    /// Non-cumulative count per finite bound.
    bucket_counts: Vec<u64>,
    count: u64,
    sum: f64,
}

#[derive(Debug)]
struct HistogramCell {
    bounds: Arc<[f64]>,
    state: Mutex<HistogramState>,
}

impl HistogramCell {
    fn new(bounds: Arc<[f64]>) -> Self {
        let state = HistogramState {
            bucket_counts: vec![0; bounds.len()],
            count: 0,
            sum: 0.0,
        };
        Self {
            bounds,
            state: Mutex::new(state),
        }
    }

    fn observe(&self, value: f64) {
        let idx = self.bounds.partition_point(|bound| *bound < value);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = state.bucket_counts.get_mut(idx) {
            *slot += 1;
        }
        state.count += 1;
        state.sum += value;
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut cumulative = 0;
        let buckets = self
            .bounds
            .iter()
            .zip(&state.bucket_counts)
            .map(|(bound, n)| {
                cumulative += n;
                (*bound, cumulative)
            })
            .collect();
        HistogramSnapshot {
            buckets,
            count: state.count,
            sum: state.sum,
        }
    }
}

/// Point-in-time view of one histogram series.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// (upper bound, cumulative count) for every finite bound.
    pub buckets: Vec<(f64, u64)>,
    /// Total observations; also the `+Inf` bucket.
    pub count: u64,
    pub sum: f64,
}

#[derive(Debug, Clone)]
enum Series {
    Counter(Arc<AtomicU64>),
    Histogram(Arc<HistogramCell>),
}

#[derive(Debug)]
struct Family {
    help: String,
    kind: MetricKind,
    label_keys: Vec<String>,
    bounds: Arc<[f64]>,
    series: DashMap<Vec<String>, Series>,
}

impl Family {
    fn same_shape(&self, kind: MetricKind, keys: &[&str], bounds: &[f64]) -> bool {
        self.kind == kind
            && self.label_keys.len() == keys.len()
            && self.label_keys.iter().zip(keys).all(|(a, b)| a == b)
            && *self.bounds == *bounds
    }

    /// Order label values by the declared schema.
    fn ordered_values(&self, name: &str, labels: &[(&str, &str)]) -> Result<Vec<String>, MetricsError> {
        let mismatch = || MetricsError::LabelMismatch {
            name: name.to_string(),
            expected: self.label_keys.clone(),
            got: labels.iter().map(|(k, _)| k.to_string()).collect(),
        };
        if labels.len() != self.label_keys.len() {
            return Err(mismatch());
        }
        let mut values: Vec<Option<String>> = vec![None; self.label_keys.len()];
        for (key, value) in labels {
            let idx = self
                .label_keys
                .iter()
                .position(|k| k.as_str() == *key)
                .ok_or_else(mismatch)?;
            if values[idx].is_some() {
                return Err(mismatch());
            }
            values[idx] = Some((*value).to_string());
        }
        values.into_iter().collect::<Option<Vec<_>>>().ok_or_else(mismatch)
    }

    fn new_series(&self) -> Series {
        match self.kind {
            MetricKind::Counter => Series::Counter(Arc::new(AtomicU64::new(0))),
            MetricKind::Histogram => Series::Histogram(Arc::new(HistogramCell::new(self.bounds.clone()))),
        }
    }
}

#[derive(Debug)]
struct RegistryInner {
    families: DashMap<String, Arc<Family>>,
    max_series: usize,
}

/// Process-wide metric store. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Create an empty registry (only `instrumentation_errors_total` declared).
    pub fn new() -> Self {
        Self::with_max_series(DEFAULT_MAX_SERIES)
    }

    pub fn with_max_series(max_series: usize) -> Self {
        let registry = Self {
            inner: Arc::new(RegistryInner {
                families: DashMap::new(),
                max_series: max_series.max(1),
            }),
        };
        // Fresh registry: cannot conflict.
        let _ = registry.register_counter(
            INSTRUMENTATION_ERRORS,
            "Failures inside the metrics or logging path",
            &["kind"],
        );
        registry
    }

    /// Registry with the request families declared up front.
    pub fn for_requests(max_series: usize) -> Result<Self, MetricsError> {
        let registry = Self::with_max_series(max_series);
        registry.register_counter(
            REQUEST_COUNT,
            "Total request count",
            &["method", "endpoint", "status"],
        )?;
        registry.register_histogram(
            REQUEST_LATENCY,
            "Request latency",
            &["method", "endpoint"],
            DEFAULT_LATENCY_BUCKETS,
        )?;
        registry.register_counter(ERROR_COUNT, "Total error count", &["endpoint", "error_type"])?;
        registry.register_counter(
            REQUEST_CANCELLED,
            "Requests cancelled before the handler completed",
            &["method", "endpoint"],
        )?;
        registry.register_counter(
            LOG_EVENTS_DROPPED,
            "Log events dropped because the sink buffer was full",
            &[],
        )?;
        Ok(registry)
    }

    /// Declare a counter family.
    pub fn register_counter(&self, name: &str, help: &str, label_keys: &[&str]) -> Result<(), MetricsError> {
        self.register(name, help, MetricKind::Counter, label_keys, &[])
            .map(drop)
    }

    /// Declare a histogram family with fixed bucket upper bounds.
    pub fn register_histogram(
        &self,
        name: &str,
        help: &str,
        label_keys: &[&str],
        buckets: &[f64],
    ) -> Result<(), MetricsError> {
        validate_buckets(name, buckets)?;
        self.register(name, help, MetricKind::Histogram, label_keys, buckets)
            .map(drop)
    }

    fn register(
        &self,
        name: &str,
        help: &str,
        kind: MetricKind,
        label_keys: &[&str],
        bounds: &[f64],
    ) -> Result<Arc<Family>, MetricsError> {
        if !is_valid_metric_name(name) {
            return Err(MetricsError::InvalidName(name.to_string()));
        }
        if let Some(bad) = label_keys.iter().find(|k| !is_valid_label_name(k)) {
            return Err(MetricsError::InvalidName((*bad).to_string()));
        }
        for (i, key) in label_keys.iter().enumerate() {
            if label_keys[..i].contains(key) {
                return Err(MetricsError::InvalidName((*key).to_string()));
            }
        }
        // `le` is reserved for bucket bounds.
        if kind == MetricKind::Histogram && label_keys.contains(&"le") {
            return Err(MetricsError::InvalidName("le".to_string()));
        }

        let family = self
            .inner
            .families
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Family {
                    help: help.to_string(),
                    kind,
                    label_keys: label_keys.iter().map(|k| k.to_string()).collect(),
                    bounds: bounds.into(),
                    series: DashMap::new(),
                })
            })
            .clone();

        if family.same_shape(kind, label_keys, bounds) {
            Ok(family)
        } else {
            Err(MetricsError::SchemaConflict {
                name: name.to_string(),
            })
        }
    }

    fn family(&self, name: &str, kind: MetricKind, labels: &[(&str, &str)]) -> Result<Arc<Family>, MetricsError> {
        let existing = self.inner.families.get(name).map(|f| f.value().clone());
        let family = match existing {
            Some(family) => family,
            None => {
                // Lazy registration: first use fixes the schema.
                let keys: Vec<&str> = labels.iter().map(|(k, _)| *k).collect();
                let bounds = match kind {
                    MetricKind::Counter => &[][..],
                    MetricKind::Histogram => DEFAULT_LATENCY_BUCKETS,
                };
                match self.register(name, "", kind, &keys, bounds) {
                    Ok(family) => family,
                    // Lost a registration race; validate against the winner.
                    Err(MetricsError::SchemaConflict { .. }) => self
                        .inner
                        .families
                        .get(name)
                        .map(|f| f.value().clone())
                        .ok_or_else(|| MetricsError::SchemaConflict {
                            name: name.to_string(),
                        })?,
                    Err(e) => return Err(e),
                }
            }
        };
        if family.kind != kind {
            return Err(MetricsError::KindMismatch {
                name: name.to_string(),
                actual: family.kind,
                requested: kind,
            });
        }
        Ok(family)
    }

    fn series(&self, name: &str, kind: MetricKind, labels: &[(&str, &str)]) -> Result<Series, MetricsError> {
        let family = self.family(name, kind, labels)?;
        let values = family.ordered_values(name, labels)?;

        if let Some(series) = family.series.get(&values) {
            return Ok(series.value().clone());
        }
        if family.series.len() >= self.inner.max_series {
            return Err(MetricsError::CardinalityExceeded {
                name: name.to_string(),
                limit: self.inner.max_series,
            });
        }
        let series = family
            .series
            .entry(values)
            .or_insert_with(|| family.new_series())
            .value()
            .clone();
        Ok(series)
    }

    /// Resolve a counter series, surfacing any error.
    pub fn try_counter(&self, name: &str, labels: &[(&str, &str)]) -> Result<Counter, MetricsError> {
        match self.series(name, MetricKind::Counter, labels)? {
            Series::Counter(cell) => Ok(Counter { cell: Some(cell) }),
            Series::Histogram(_) => unreachable!("family kind checked"),
        }
    }

    /// Resolve a counter series; failures are reported and yield a no-op handle.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> Counter {
        self.try_counter(name, labels).unwrap_or_else(|e| {
            self.report(&e);
            Counter { cell: None }
        })
    }

    /// Resolve a histogram series, surfacing any error.
    pub fn try_histogram(&self, name: &str, labels: &[(&str, &str)]) -> Result<Histogram, MetricsError> {
        match self.series(name, MetricKind::Histogram, labels)? {
            Series::Histogram(cell) => Ok(Histogram {
                name: Arc::from(name),
                cell: Some(cell),
                registry: self.clone(),
            }),
            Series::Counter(_) => unreachable!("family kind checked"),
        }
    }

    /// Resolve a histogram series; failures are reported and yield a no-op handle.
    pub fn histogram(&self, name: &str, labels: &[(&str, &str)]) -> Histogram {
        self.try_histogram(name, labels).unwrap_or_else(|e| {
            self.report(&e);
            Histogram {
                name: Arc::from(name),
                cell: None,
                registry: self.clone(),
            }
        })
    }

    /// Log an instrumentation failure and count it. Never fails.
    pub fn report(&self, err: &MetricsError) {
        tracing::warn!(error = %err, kind = err.kind(), "Instrumentation error");
        if let Ok(counter) = self.try_counter(INSTRUMENTATION_ERRORS, &[("kind", err.kind())]) {
            counter.increment();
        }
    }

    /// Current value of a counter series, if it exists.
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<u64> {
        let family = self.inner.families.get(name)?.value().clone();
        let values = family.ordered_values(name, labels).ok()?;
        let series = family.series.get(&values)?.value().clone();
        match series {
            Series::Counter(cell) => Some(cell.load(Ordering::Relaxed)),
            Series::Histogram(_) => None,
        }
    }

    /// Current state of a histogram series, if it exists.
    pub fn histogram_snapshot(&self, name: &str, labels: &[(&str, &str)]) -> Option<HistogramSnapshot> {
        let family = self.inner.families.get(name)?.value().clone();
        let values = family.ordered_values(name, labels).ok()?;
        let series = family.series.get(&values)?.value().clone();
        match series {
            Series::Histogram(cell) => Some(cell.snapshot()),
            Series::Counter(_) => None,
        }
    }

    /// Sum of a counter over all its series.
    pub fn counter_total(&self, name: &str) -> u64 {
        let Some(family) = self.inner.families.get(name).map(|f| f.value().clone()) else {
            return 0;
        };
        // Bound to a local so the iterator is dropped before `family`.
        let total = family
            .series
            .iter()
            .map(|entry| match entry.value() {
                Series::Counter(cell) => cell.load(Ordering::Relaxed),
                Series::Histogram(_) => 0,
            })
            .sum();
        total
    }

    /// Render every family in the text exposition format.
    ///
    /// Each series is read atomically; different series may reflect slightly
    /// different instants.
    pub fn snapshot(&self) -> String {
        let mut families: Vec<(String, Arc<Family>)> = self
            .inner
            .families
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        families.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = String::new();
        for (name, family) in families {
            let mut series: Vec<(Vec<String>, Series)> = family
                .series
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect();
            series.sort_by(|a, b| a.0.cmp(&b.0));

            if !family.help.is_empty() {
                let _ = writeln!(out, "# HELP {} {}", name, escape_help(&family.help));
            }
            let _ = writeln!(out, "# TYPE {} {}", name, family.kind);

            for (values, series) in series {
                let labels = render_labels(&family.label_keys, &values, None);
                match series {
                    Series::Counter(cell) => {
                        let _ = writeln!(out, "{}{} {}", name, labels, cell.load(Ordering::Relaxed));
                    }
                    Series::Histogram(cell) => {
                        let snap = cell.snapshot();
                        for (bound, cumulative) in &snap.buckets {
                            let le = render_labels(&family.label_keys, &values, Some(&format_float(*bound)));
                            let _ = writeln!(out, "{}_bucket{} {}", name, le, cumulative);
                        }
                        let inf = render_labels(&family.label_keys, &values, Some("+Inf"));
                        let _ = writeln!(out, "{}_bucket{} {}", name, inf, snap.count);
                        let _ = writeln!(out, "{}_sum{} {}", name, labels, format_float(snap.sum));
                        let _ = writeln!(out, "{}_count{} {}", name, labels, snap.count);
                    }
                }
            }
        }
        out
    }
}

/// Handle to one counter series. A handle from a failed lookup does nothing.
#[derive(Debug, Clone)]
pub struct Counter {
    cell: Option<Arc<AtomicU64>>,
}

impl Counter {
    pub fn increment(&self) {
        self.increment_by(1);
    }

    pub fn increment_by(&self, n: u64) {
        if let Some(cell) = &self.cell {
            cell.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// False for the no-op handle returned after an error.
    pub fn is_live(&self) -> bool {
        self.cell.is_some()
    }

    pub fn value(&self) -> u64 {
        self.cell.as_ref().map_or(0, |c| c.load(Ordering::Relaxed))
    }
}

/// Handle to one histogram series.
#[derive(Debug, Clone)]
pub struct Histogram {
    name: Arc<str>,
    cell: Option<Arc<HistogramCell>>,
    registry: MetricsRegistry,
}

impl Histogram {
    pub fn observe(&self, value: f64) {
        let Some(cell) = &self.cell else { return };
        if !value.is_finite() {
            self.registry.report(&MetricsError::InvalidObservation {
                name: self.name.to_string(),
            });
            return;
        }
        cell.observe(value);
    }

    pub fn is_live(&self) -> bool {
        self.cell.is_some()
    }
}

fn validate_buckets(name: &str, buckets: &[f64]) -> Result<(), MetricsError> {
    let invalid = |reason| MetricsError::InvalidBuckets {
        name: name.to_string(),
        reason,
    };
    if buckets.is_empty() {
        return Err(invalid("at least one bucket required"));
    }
    if buckets.iter().any(|b| !b.is_finite()) {
        return Err(invalid("bounds must be finite (+Inf is implicit)"));
    }
    if buckets.windows(2).any(|w| w[0] >= w[1]) {
        return Err(invalid("bounds must be strictly increasing"));
    }
    Ok(())
}

fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with("__")
}

fn render_labels(keys: &[String], values: &[String], le: Option<&str>) -> String {
    if keys.is_empty() && le.is_none() {
        return String::new();
    }
    let mut out = String::from("{");
    for (i, (key, value)) in keys.iter().zip(values).enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{}=\"{}\"", key, escape_label_value(value));
    }
    if let Some(le) = le {
        if !keys.is_empty() {
            out.push(',');
        }
        let _ = write!(out, "le=\"{}\"", le);
    }
    out.push('}');
    out
}

fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

fn format_float(value: f64) -> String {
    if value.is_infinite() {
        if value > 0.0 { "+Inf".into() } else { "-Inf".into() }
    } else {
        value.to_string()
    }
}
