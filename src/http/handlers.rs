//! Demo endpoints.
//!
//! Handlers do a little simulated work and consult the fault gate. The
//! interceptor takes care of metrics and logging; handlers only classify
//! their own errors.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{FromRequestParts, MatchedPath, Path, Query, State},
    http::{request::Parts, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::WorkloadConfig;
use crate::faults::{InjectedFault, RequestFeatures};
use crate::http::error::AppError;
use crate::http::server::AppState;
use crate::observability::CorrelationContext;

/// Fault-relevant view of the incoming request.
#[derive(Debug, Clone)]
pub struct FaultProbe {
    /// Route template, as used for the policy lookup.
    pub endpoint: String,
    pub features: RequestFeatures,
    pub context: Option<CorrelationContext>,
}

impl<S> FromRequestParts<S> for FaultProbe
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let endpoint = parts
            .extensions
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());
        Ok(Self {
            endpoint,
            features: RequestFeatures::from_request(parts.uri.query(), &parts.headers),
            context: parts.extensions.get::<CorrelationContext>().copied(),
        })
    }
}

/// Apply the injector's decision for this request.
///
/// Latency is a cooperative sleep after which the handler carries on; error
/// faults short-circuit with `error_type` and `detail`.
async fn fault_gate(
    state: &AppState,
    probe: &FaultProbe,
    error_type: &'static str,
    detail: &str,
) -> Result<(), AppError> {
    let fault = state.injector.decide(&probe.endpoint, &probe.features);
    if fault != InjectedFault::None {
        tracing::debug!(
            endpoint = %probe.endpoint,
            fault = %fault.kind(),
            trace_id = ?probe.context.map(|c| c.trace_id().to_string()),
            "Injecting fault"
        );
    }
    match fault {
        InjectedFault::None => Ok(()),
        InjectedFault::Latency(delay) => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
        InjectedFault::ClientError { status } => Err(AppError::client(
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST),
            error_type,
            detail,
        )),
        InjectedFault::ServerError { status } => Err(AppError::server(
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            error_type,
            detail,
        )),
    }
}

/// Sleep for a random slice of the configured work window; returns seconds.
async fn simulate_work(workload: &WorkloadConfig) -> f64 {
    let (lo, hi) = if workload.min_work_ms <= workload.max_work_ms {
        (workload.min_work_ms, workload.max_work_ms)
    } else {
        (workload.max_work_ms, workload.min_work_ms)
    };
    let ms = fastrand::u64(lo..=hi);
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
    ms as f64 / 1000.0
}

fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

pub async fn root(State(state): State<AppState>, probe: FaultProbe) -> Result<Json<Value>, AppError> {
    let processing_time = simulate_work(&state.workload).await;
    fault_gate(&state, &probe, "simulated_error", "Simulated server error").await?;
    Ok(Json(json!({
        "message": "Hello World!",
        "processing_time": processing_time,
    })))
}

pub async fn health(State(state): State<AppState>, probe: FaultProbe) -> Result<Json<Value>, AppError> {
    fault_gate(
        &state,
        &probe,
        "health_check_failed",
        "Service temporarily unavailable",
    )
    .await?;
    Ok(Json(json!({
        "status": "healthy",
        "timestamp": unix_seconds(),
    })))
}

pub async fn data(State(state): State<AppState>, probe: FaultProbe) -> Result<Json<Value>, AppError> {
    let processing_time = simulate_work(&state.workload).await;
    fault_gate(&state, &probe, "data_fetch_error", "Data not available").await?;
    Ok(Json(json!({
        "items": [
            {"id": 1, "name": "Item 1"},
            {"id": 2, "name": "Item 2"},
            {"id": 3, "name": "Item 3"},
        ],
        "processing_time": processing_time,
        "timestamp": unix_seconds(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct ErrorTestParams {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

const ERROR_TEST_KINDS: [&str; 3] = ["value_error", "key_error", "division_error"];

/// Always fails; `?type=` picks which error, otherwise one at random.
pub async fn error_test(
    State(state): State<AppState>,
    probe: FaultProbe,
    Query(params): Query<ErrorTestParams>,
) -> Result<Json<Value>, AppError> {
    fault_gate(&state, &probe, "injected_fault", "Injected fault").await?;
    let kind = match params.kind.as_deref() {
        Some(kind) => kind,
        None => ERROR_TEST_KINDS[fastrand::usize(..ERROR_TEST_KINDS.len())],
    };
    let err = match kind {
        "value_error" => AppError::server(
            StatusCode::INTERNAL_SERVER_ERROR,
            "value_error",
            "This is a simulated value error",
        ),
        "key_error" => AppError::server(
            StatusCode::INTERNAL_SERVER_ERROR,
            "key_error",
            "'This is a simulated key error'",
        ),
        "division_error" => {
            AppError::server(StatusCode::INTERNAL_SERVER_ERROR, "division_error", "division by zero")
        }
        other => AppError::client(
            StatusCode::BAD_REQUEST,
            "invalid_error_type",
            format!("unknown error type '{other}'"),
        ),
    };
    Err(err)
}

pub async fn item(
    State(state): State<AppState>,
    probe: FaultProbe,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id: u64 = id.parse().map_err(|_| {
        AppError::client(
            StatusCode::BAD_REQUEST,
            "invalid_item_id",
            format!("item id must be a non-negative integer, got '{id}'"),
        )
    })?;
    fault_gate(&state, &probe, "injected_fault", "Injected fault").await?;
    Ok(Json(json!({
        "id": id,
        "name": format!("Item {id}"),
    })))
}
