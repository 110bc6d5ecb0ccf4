//! Request interceptor.
//!
//! # Responsibilities
//! - Time every request and establish its correlation context
//! - Classify the outcome (success, client error, server error, cancelled)
//! - Update the request metrics exactly once per request
//! - Emit exactly one structured log event per request
//!
//! # Data Flow
//! ```text
//! request ─▶ intercept ─▶ [Started] ─▶ handler [HandlerRunning]
//!                                        │
//!            ┌───────────────────────────┼──────────────────────────┐
//!            ▼                           ▼                          ▼
//!        response                 panic (caught)             future dropped
//!     Completed / Failed         Failed (500, panic)          Cancelled (499)
//!            └──────────── metrics + LogEvent ──────────────────────┘
//! ```
//!
//! # Design Decisions
//! - Endpoint label is the matched route template, never the raw path
//! - The in-flight record is a drop guard so cancellation is never silent
//! - Instrumentation problems degrade to no-ops inside the registry/sink

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, State},
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use futures_util::FutureExt;

use crate::http::error::{AppError, ErrorInfo, Outcome};
use crate::observability::context::{CorrelationContext, TRACEPARENT, X_TRACE_ID};
use crate::observability::metrics::{ERROR_COUNT, REQUEST_CANCELLED, REQUEST_COUNT, REQUEST_LATENCY};
use crate::observability::{Level, LogEvent, LogSink, MetricsRegistry};

/// Endpoint label for requests no route matched.
pub const UNMATCHED: &str = "unmatched";

/// Status recorded for requests that never produced a response.
pub const CANCELLED_STATUS: u16 = 499;

/// Shared instrumentation handles injected into the interceptor.
#[derive(Debug, Clone)]
pub struct Instrumentation {
    pub registry: MetricsRegistry,
    pub sink: LogSink,
}

impl Instrumentation {
    pub fn new(registry: MetricsRegistry, sink: LogSink) -> Self {
        Self { registry, sink }
    }
}

/// Wrap every route (and the fallback) of `router` with the interceptor.
pub fn instrument<S>(router: Router<S>, instrumentation: Instrumentation) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(instrumentation, intercept))
}

/// Lifecycle of one request inside the interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Started,
    HandlerRunning,
    Completed,
    Failed,
    Cancelled,
}

/// Per-request bookkeeping. Lives only as long as the request.
#[derive(Debug)]
pub struct RequestRecord {
    pub started: Instant,
    pub method: &'static str,
    pub endpoint: String,
    pub path: String,
    pub phase: RequestPhase,
    pub context: CorrelationContext,
    pub user_agent: String,
    pub client_ip: Option<String>,
}

/// Bounded method label; anything non-standard collapses to `OTHER`.
pub fn method_label(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        Method::PATCH => "PATCH",
        Method::HEAD => "HEAD",
        Method::OPTIONS => "OPTIONS",
        Method::CONNECT => "CONNECT",
        Method::TRACE => "TRACE",
        _ => "OTHER",
    }
}

/// Middleware entry point.
pub async fn intercept(
    State(instrumentation): State<Instrumentation>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED.to_string());
    let context = CorrelationContext::begin(
        request
            .headers()
            .get(TRACEPARENT)
            .and_then(|v| v.to_str().ok()),
    );
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let record = RequestRecord {
        started: Instant::now(),
        method: method_label(request.method()),
        endpoint,
        path: request.uri().path().to_string(),
        phase: RequestPhase::Started,
        context,
        user_agent,
        client_ip,
    };
    request.extensions_mut().insert(context);

    let mut in_flight = InFlight::new(instrumentation, record);
    in_flight.set_phase(RequestPhase::HandlerRunning);

    let mut response = match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let detail = panic_message(panic.as_ref());
            tracing::error!(trace_id = %context.trace_id(), panic = %detail, "Handler panicked");
            let mut response =
                AppError::server(StatusCode::INTERNAL_SERVER_ERROR, "panic", "Internal server error")
                    .into_response();
            response.extensions_mut().insert(ErrorInfo {
                error_type: "panic",
                detail,
            });
            response
        }
    };

    in_flight.complete(&response);

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&context.propagate()) {
        headers.insert(TRACEPARENT, value);
    }
    if let Ok(value) = HeaderValue::from_str(&context.trace_id().to_string()) {
        headers.insert(X_TRACE_ID, value);
    }
    response
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Drop guard owning the record until exactly one terminal outcome is recorded.
struct InFlight {
    instrumentation: Instrumentation,
    record: Option<RequestRecord>,
}

impl InFlight {
    fn new(instrumentation: Instrumentation, record: RequestRecord) -> Self {
        Self {
            instrumentation,
            record: Some(record),
        }
    }

    fn set_phase(&mut self, phase: RequestPhase) {
        if let Some(record) = self.record.as_mut() {
            record.phase = phase;
        }
    }

    fn complete(&mut self, response: &Response) {
        let Some(mut record) = self.record.take() else {
            return;
        };
        let status = response.status();
        let outcome = Outcome::classify(status);
        record.phase = match outcome {
            Outcome::ServerError => RequestPhase::Failed,
            _ => RequestPhase::Completed,
        };
        let info = response.extensions().get::<ErrorInfo>();
        finish(
            &self.instrumentation,
            &record,
            outcome,
            status.as_u16(),
            info,
        );
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(mut record) = self.record.take() {
            record.phase = RequestPhase::Cancelled;
            finish(
                &self.instrumentation,
                &record,
                Outcome::Cancelled,
                CANCELLED_STATUS,
                None,
            );
        }
    }
}

/// Record metrics and the log event for a finished request.
fn finish(
    instrumentation: &Instrumentation,
    record: &RequestRecord,
    outcome: Outcome,
    status: u16,
    info: Option<&ErrorInfo>,
) {
    let registry = &instrumentation.registry;
    let elapsed = record.started.elapsed().as_secs_f64();
    let method = record.method;
    let endpoint = record.endpoint.as_str();
    let status_label = status.to_string();

    registry
        .counter(
            REQUEST_COUNT,
            &[("method", method), ("endpoint", endpoint), ("status", status_label.as_str())],
        )
        .increment();
    registry
        .histogram(REQUEST_LATENCY, &[("method", method), ("endpoint", endpoint)])
        .observe(elapsed);

    let error_type = match outcome {
        Outcome::Success => None,
        Outcome::ClientError => Some(info.map_or("client_error", |i| i.error_type)),
        Outcome::ServerError => Some(info.map_or("server_error", |i| i.error_type)),
        Outcome::Cancelled => {
            registry
                .counter(REQUEST_CANCELLED, &[("method", method), ("endpoint", endpoint)])
                .increment();
            None
        }
    };
    if let Some(error_type) = error_type {
        registry
            .counter(ERROR_COUNT, &[("endpoint", endpoint), ("error_type", error_type)])
            .increment();
    }

    let message = match outcome {
        Outcome::Success => "Request processed",
        Outcome::ClientError => "Client error",
        Outcome::ServerError => "Server error",
        Outcome::Cancelled => "Request cancelled",
    };
    let mut event = LogEvent::new(outcome.level(), message, &record.context)
        .with_field("method", method)
        .with_field("endpoint", endpoint)
        .with_field("path", record.path.as_str())
        .with_field("status", status)
        .with_field("outcome", outcome.as_str())
        .with_field("duration_seconds", (elapsed * 1e6).round() / 1e6)
        .with_field("user_agent", record.user_agent.as_str());
    if let Some(ip) = &record.client_ip {
        event = event.with_field("client_ip", ip.as_str());
    }
    if let Some(error_type) = error_type {
        event = event.with_field("error_type", error_type);
    }
    if let Some(info) = info {
        event = event.with_field("detail", info.detail.as_str());
    }

    if event.level != Level::Info {
        tracing::debug!(
            trace_id = %record.context.trace_id(),
            endpoint = %endpoint,
            status,
            phase = ?record.phase,
            "Request did not succeed"
        );
    }
    instrumentation.sink.emit(event);
}
