//! Handler errors and request outcome classification.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::observability::Level;

/// Error classification a handler attaches to its response.
///
/// `error_type` becomes a metric label, so it is always a compile-time
/// constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub error_type: &'static str,
    pub detail: String,
}

/// An intentionally classified HTTP error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    /// Caller's fault; surfaced as 4xx.
    #[error("{detail}")]
    Client {
        status: StatusCode,
        error_type: &'static str,
        detail: String,
    },
    /// Handler fault, injected or genuine; surfaced as 5xx.
    #[error("{detail}")]
    Server {
        status: StatusCode,
        error_type: &'static str,
        detail: String,
    },
}

impl AppError {
    pub fn client(status: StatusCode, error_type: &'static str, detail: impl Into<String>) -> Self {
        AppError::Client {
            status,
            error_type,
            detail: detail.into(),
        }
    }

    pub fn server(status: StatusCode, error_type: &'static str, detail: impl Into<String>) -> Self {
        AppError::Server {
            status,
            error_type,
            detail: detail.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Client { status, .. } | AppError::Server { status, .. } => *status,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Client { error_type, .. } | AppError::Server { error_type, .. } => error_type,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, detail) = match self {
            AppError::Client {
                status,
                error_type,
                detail,
            }
            | AppError::Server {
                status,
                error_type,
                detail,
            } => (status, error_type, detail),
        };
        let mut response = (status, Json(serde_json::json!({ "detail": detail }))).into_response();
        response.extensions_mut().insert(ErrorInfo { error_type, detail });
        response
    }
}

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    ClientError,
    ServerError,
    /// Dropped before the handler finished (client gone or timed out).
    Cancelled,
}

impl Outcome {
    /// Classify a finished response by status code.
    pub fn classify(status: StatusCode) -> Self {
        match status.as_u16() {
            0..=399 => Outcome::Success,
            400..=499 => Outcome::ClientError,
            _ => Outcome::ServerError,
        }
    }

    pub fn level(&self) -> Level {
        match self {
            Outcome::Success => Level::Info,
            Outcome::ClientError | Outcome::Cancelled => Level::Warning,
            Outcome::ServerError => Level::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::ClientError => "client_error",
            Outcome::ServerError => "server_error",
            Outcome::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(Outcome::classify(StatusCode::OK), Outcome::Success);
        assert_eq!(Outcome::classify(StatusCode::PERMANENT_REDIRECT), Outcome::Success);
        assert_eq!(Outcome::classify(StatusCode::NOT_FOUND), Outcome::ClientError);
        assert_eq!(Outcome::classify(StatusCode::INTERNAL_SERVER_ERROR), Outcome::ServerError);
        assert_eq!(Outcome::classify(StatusCode::SERVICE_UNAVAILABLE), Outcome::ServerError);
    }

    #[test]
    fn test_error_response_carries_info() {
        let response = AppError::client(StatusCode::NOT_FOUND, "data_fetch_error", "Data not available")
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let info = response.extensions().get::<ErrorInfo>().unwrap();
        assert_eq!(info.error_type, "data_fetch_error");
        assert_eq!(info.detail, "Data not available");
    }
}
