//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the diagnostic logging subsystem (`tracing`)
//! - Define the per-request `LogEvent` and its JSON shape
//! - Ship events to an append-only sink without blocking request tasks
//!
//! # Design Decisions
//! - Diagnostics go to stderr through `tracing`; request events are a
//!   separate JSON-lines stream (stdout or file) for the log aggregator
//! - JSON format for production, pretty format for development
//! - Log level configurable via config and environment (`RUST_LOG`)
//! - Emission is `try_send` onto a bounded buffer; a full buffer drops the
//!   event and counts it rather than stalling the request

use std::fs::OpenOptions;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{EventLogTarget, LogFormat, ObservabilityConfig};
use crate::observability::context::CorrelationContext;
use crate::observability::metrics::{Counter, MetricsRegistry, LOG_EVENTS_DROPPED};

/// Initialize the global diagnostic subscriber.
///
/// `RUST_LOG` wins over `log_level` when set.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{},hyper=warn,reqwest=warn", config.log_level).into());

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

/// Severity of a request event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Info,
    Warning,
    Error,
}

/// One request log line. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    /// Unix epoch nanoseconds.
    pub timestamp: u64,
    pub level: Level,
    pub message: String,
    pub trace_id: String,
    pub span_id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl LogEvent {
    pub fn new(level: Level, message: impl Into<String>, ctx: &CorrelationContext) -> Self {
        let mut fields = Map::new();
        if let Some(parent) = ctx.parent_span_id() {
            fields.insert("parent_span_id".into(), Value::String(parent.to_string()));
        }
        Self {
            timestamp: now_nanos(),
            level,
            message: message.into(),
            trace_id: ctx.trace_id().to_string(),
            span_id: ctx.span_id().to_string(),
            fields,
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Events captured in memory (tests, embedding).
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    events: Arc<Mutex<Vec<LogEvent>>>,
}

impl MemoryLog {
    pub fn events(&self) -> Vec<LogEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
enum SinkInner {
    Channel(mpsc::Sender<LogEvent>),
    Memory(MemoryLog),
    Disabled,
}

/// Append-only destination for request events. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LogSink {
    inner: SinkInner,
    dropped: Counter,
}

impl LogSink {
    /// Open the configured target and spawn its writer task.
    ///
    /// The task ends once every clone of the sink has been dropped and the
    /// buffer is drained.
    pub fn spawn(
        target: &EventLogTarget,
        capacity: usize,
        registry: &MetricsRegistry,
    ) -> std::io::Result<(Self, Option<JoinHandle<()>>)> {
        let dropped = registry.counter(LOG_EVENTS_DROPPED, &[]);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = match target {
            EventLogTarget::Disabled => {
                return Ok((
                    Self {
                        inner: SinkInner::Disabled,
                        dropped,
                    },
                    None,
                ))
            }
            EventLogTarget::Stdout => tokio::spawn(write_events(rx, tokio::io::stdout())),
            EventLogTarget::File(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                tracing::info!(path = %path, "Request event log opened");
                tokio::spawn(write_events(rx, tokio::fs::File::from_std(file)))
            }
        };
        Ok((
            Self {
                inner: SinkInner::Channel(tx),
                dropped,
            },
            Some(handle),
        ))
    }

    /// Sink that keeps events in memory.
    pub fn memory(registry: &MetricsRegistry) -> (Self, MemoryLog) {
        let log = MemoryLog::default();
        (
            Self {
                inner: SinkInner::Memory(log.clone()),
                dropped: registry.counter(LOG_EVENTS_DROPPED, &[]),
            },
            log,
        )
    }

    /// Sink that discards everything.
    pub fn disabled(registry: &MetricsRegistry) -> Self {
        Self {
            inner: SinkInner::Disabled,
            dropped: registry.counter(LOG_EVENTS_DROPPED, &[]),
        }
    }

    /// Hand an event to the sink. Never blocks and never fails the caller.
    pub fn emit(&self, event: LogEvent) {
        match &self.inner {
            SinkInner::Channel(tx) => {
                if let Err(e) = tx.try_send(event) {
                    self.dropped.increment();
                    tracing::debug!(error = %e, "Request event dropped");
                }
            }
            SinkInner::Memory(log) => {
                log.events
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(event);
            }
            SinkInner::Disabled => {}
        }
    }
}

async fn write_events<W>(mut rx: mpsc::Receiver<LogEvent>, writer: W)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut writer = BufWriter::new(writer);
    while let Some(event) = rx.recv().await {
        write_line(&mut writer, &event).await;
        // Drain whatever is already queued before paying for a flush.
        while let Ok(event) = rx.try_recv() {
            write_line(&mut writer, &event).await;
        }
        if let Err(e) = writer.flush().await {
            tracing::error!(error = %e, "Failed to flush request event log");
        }
    }
    let _ = writer.flush().await;
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut BufWriter<W>, event: &LogEvent) {
    let mut line = match event.to_json() {
        Ok(line) => line,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize request event");
            return;
        }
    };
    line.push('\n');
    if let Err(e) = writer.write_all(line.as_bytes()).await {
        tracing::error!(error = %e, "Failed to write request event");
    }
}
