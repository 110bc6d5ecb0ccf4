//! Trace correlation context.
//!
//! # Responsibilities
//! - Extract trace context from incoming requests
//! - Mint trace and span ids when none (or garbage) arrives
//! - Propagate trace context to downstream calls
//! - Provide correlation fields for the logging path
//!
//! # Design Decisions
//! - Fail soft: a malformed header never rejects the request
//! - Accepts W3C `traceparent` and the short `trace:span` form
//! - Immutable once created; nested work gets a `child()` span

use std::fmt;

/// Header carrying the trace id and parent span id.
pub const TRACEPARENT: &str = "traceparent";

/// Response header echoing the trace id for callers.
pub const X_TRACE_ID: &str = "x-trace-id";

/// 128-bit trace identifier, rendered as 32 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(u128);

/// 64-bit span identifier, rendered as 16 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(u64);

impl TraceId {
    /// Mint a random, non-zero trace id.
    pub fn random() -> Self {
        loop {
            let id: u128 = rand::random();
            if id != 0 {
                return Self(id);
            }
        }
    }

    fn parse(hex: &str) -> Option<Self> {
        if hex.len() != 32 {
            return None;
        }
        parse_hex_u128(hex).filter(|v| *v != 0).map(Self)
    }
}

impl SpanId {
    /// Mint a random, non-zero span id.
    pub fn random() -> Self {
        loop {
            let id: u64 = rand::random();
            if id != 0 {
                return Self(id);
            }
        }
    }

    fn parse(hex: &str) -> Option<Self> {
        if hex.len() != 16 {
            return None;
        }
        parse_hex_u128(hex)
            .and_then(|v| u64::try_from(v).ok())
            .filter(|v| *v != 0)
            .map(Self)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// from_str_radix alone would accept a leading '+'.
fn parse_hex_u128(s: &str) -> Option<u128> {
    if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u128::from_str_radix(s, 16).ok()
}

/// Correlation identifiers for one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationContext {
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
}

impl CorrelationContext {
    /// Establish the context at the service boundary.
    ///
    /// A well-formed inbound header contributes the trace id and the parent
    /// span id; a fresh span id is always minted. Anything else falls back to a
    /// brand new root context.
    pub fn begin(inbound: Option<&str>) -> Self {
        match inbound {
            Some(header) => match parse_header(header) {
                Some((trace_id, parent)) => Self {
                    trace_id,
                    span_id: SpanId::random(),
                    parent_span_id: Some(parent),
                },
                None => {
                    tracing::debug!(header = %header, "Malformed trace header, minting new trace");
                    Self::root()
                }
            },
            None => Self::root(),
        }
    }

    /// A brand new trace with a root span.
    pub fn root() -> Self {
        Self {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            parent_span_id: None,
        }
    }

    /// Derive the context for a nested operation.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: SpanId::random(),
            parent_span_id: Some(self.span_id),
        }
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.parent_span_id
    }

    /// Header value for outbound calls (`00-{trace}-{span}-01`).
    pub fn propagate(&self) -> String {
        format!("00-{}-{}-01", self.trace_id, self.span_id)
    }

    /// Correlation fields for a log line.
    pub fn as_log_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("trace_id", self.trace_id.to_string()),
            ("span_id", self.span_id.to_string()),
        ];
        if let Some(parent) = self.parent_span_id {
            fields.push(("parent_span_id", parent.to_string()));
        }
        fields
    }
}

/// Parse a propagation header into (trace id, parent span id).
///
/// Accepted:
/// - `00-<32 hex>-<16 hex>-<2 hex>` (W3C; version `ff` is invalid)
/// - `<32 hex>:<16 hex>` or `<32 hex>-<16 hex>`
pub fn parse_header(value: &str) -> Option<(TraceId, SpanId)> {
    let value = value.trim();
    let parts: Vec<&str> = value.split(['-', ':']).collect();
    match parts.as_slice() {
        [version, trace, span, flags] => {
            if version.len() != 2 || flags.len() != 2 {
                return None;
            }
            parse_hex_u128(version)?;
            parse_hex_u128(flags)?;
            if version.eq_ignore_ascii_case("ff") {
                return None;
            }
            Some((TraceId::parse(trace)?, SpanId::parse(span)?))
        }
        [trace, span] => Some((TraceId::parse(trace)?, SpanId::parse(span)?)),
        _ => None,
    }
}
