//! Fault decision types.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

/// Header a caller can use to request a specific fault.
pub const X_FAULT: &str = "x-fault";

/// Query parameter a caller can use to request a specific fault.
pub const FAULT_PARAM: &str = "fault";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    None,
    Latency,
    ClientError,
    ServerError,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::None => "none",
            FaultKind::Latency => "latency",
            FaultKind::ClientError => "client_error",
            FaultKind::ServerError => "server_error",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown fault kind '{0}' (expected none, latency, client_error or server_error)")]
pub struct UnknownFaultKind(pub String);

impl FromStr for FaultKind {
    type Err = UnknownFaultKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(FaultKind::None),
            "latency" => Ok(FaultKind::Latency),
            "client_error" => Ok(FaultKind::ClientError),
            "server_error" => Ok(FaultKind::ServerError),
            other => Err(UnknownFaultKind(other.to_string())),
        }
    }
}

/// The fault selected for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    None,
    /// Suspend for this long, then continue normally.
    Latency(Duration),
    /// Answer with this 4xx status without running business logic.
    ClientError { status: u16 },
    /// Answer with this 5xx status without running business logic.
    ServerError { status: u16 },
}

impl InjectedFault {
    pub fn kind(&self) -> FaultKind {
        match self {
            InjectedFault::None => FaultKind::None,
            InjectedFault::Latency(_) => FaultKind::Latency,
            InjectedFault::ClientError { .. } => FaultKind::ClientError,
            InjectedFault::ServerError { .. } => FaultKind::ServerError,
        }
    }
}

/// Request properties the injector may look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFeatures {
    /// Fault explicitly requested by the caller.
    pub fault_hint: Option<FaultKind>,
}

impl RequestFeatures {
    pub fn with_hint(kind: FaultKind) -> Self {
        Self {
            fault_hint: Some(kind),
        }
    }

    /// Read the hint from `?fault=` (preferred) or the `x-fault` header.
    /// Unrecognised values are ignored.
    pub fn from_request(query: Option<&str>, headers: &HeaderMap) -> Self {
        let from_query = query.and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(k, _)| k == FAULT_PARAM)
                .and_then(|(_, v)| v.parse().ok())
        });
        let fault_hint = from_query.or_else(|| {
            headers
                .get(X_FAULT)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
        });
        Self { fault_hint }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_parse_kind() {
        assert_eq!("server_error".parse::<FaultKind>(), Ok(FaultKind::ServerError));
        assert_eq!(" Latency ".parse::<FaultKind>(), Ok(FaultKind::Latency));
        assert!("teapot".parse::<FaultKind>().is_err());
    }

    #[test]
    fn test_features_from_query_and_header() {
        let mut headers = HeaderMap::new();
        let none = RequestFeatures::from_request(Some("id=3"), &headers);
        assert_eq!(none.fault_hint, None);

        let q = RequestFeatures::from_request(Some("id=3&fault=client_error"), &headers);
        assert_eq!(q.fault_hint, Some(FaultKind::ClientError));

        headers.insert(X_FAULT, HeaderValue::from_static("latency"));
        let h = RequestFeatures::from_request(None, &headers);
        assert_eq!(h.fault_hint, Some(FaultKind::Latency));

        // query wins over header
        let both = RequestFeatures::from_request(Some("fault=server_error"), &headers);
        assert_eq!(both.fault_hint, Some(FaultKind::ServerError));

        let junk = RequestFeatures::from_request(Some("fault=bogus"), &HeaderMap::new());
        assert_eq!(junk.fault_hint, None);
    }
}
