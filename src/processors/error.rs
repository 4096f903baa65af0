//! Errors reported by external document processors.

use std::fmt;

use reqwest::StatusCode;
use schemars::JsonSchema;

use crate::{prelude::*, retry::IsKnownTransient};

/// The closed set of ways a processor call can fail.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessorErrorKind {
    PermissionDenied,
    /// Quota exhausted, as reported by the service itself.
    ResourceExhausted,
    /// Malformed or corrupt input.
    InvalidArgument,
    DeadlineExceeded,
    NetworkError,
    /// Rate limited at the HTTP layer.
    QuotaExceeded,
    Timeout,
    AuthenticationError,
    InvalidDocument,
    /// Anything we can't classify.
    ProcessingError,
}

impl ProcessorErrorKind {
    /// Might trying again help?
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ProcessorErrorKind::NetworkError
                | ProcessorErrorKind::Timeout
                | ProcessorErrorKind::QuotaExceeded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessorErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ProcessorErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ProcessorErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ProcessorErrorKind::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ProcessorErrorKind::NetworkError => "NETWORK_ERROR",
            ProcessorErrorKind::QuotaExceeded => "QUOTA_EXCEEDED",
            ProcessorErrorKind::Timeout => "TIMEOUT",
            ProcessorErrorKind::AuthenticationError => "AUTHENTICATION_ERROR",
            ProcessorErrorKind::InvalidDocument => "INVALID_DOCUMENT",
            ProcessorErrorKind::ProcessingError => "PROCESSING_ERROR",
        }
    }

    /// Map an RPC status name, as found in the `error.status` field of a
    /// REST error body.
    pub fn from_rpc_status(status: &str) -> Option<Self> {
        match status {
            "PERMISSION_DENIED" => Some(ProcessorErrorKind::PermissionDenied),
            "RESOURCE_EXHAUSTED" => Some(ProcessorErrorKind::ResourceExhausted),
            "INVALID_ARGUMENT" => Some(ProcessorErrorKind::InvalidArgument),
            "DEADLINE_EXCEEDED" => Some(ProcessorErrorKind::DeadlineExceeded),
            "UNAUTHENTICATED" => Some(ProcessorErrorKind::AuthenticationError),
            _ => None,
        }
    }

    /// Map a bare HTTP status.
    pub fn from_http_status(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => ProcessorErrorKind::AuthenticationError,
            StatusCode::FORBIDDEN => ProcessorErrorKind::PermissionDenied,
            StatusCode::BAD_REQUEST => ProcessorErrorKind::InvalidArgument,
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                ProcessorErrorKind::Timeout
            }
            StatusCode::TOO_MANY_REQUESTS => ProcessorErrorKind::QuotaExceeded,
            StatusCode::UNSUPPORTED_MEDIA_TYPE | StatusCode::UNPROCESSABLE_ENTITY => {
                ProcessorErrorKind::InvalidDocument
            }
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => {
                ProcessorErrorKind::NetworkError
            }
            _ => ProcessorErrorKind::ProcessingError,
        }
    }
}

impl fmt::Display for ProcessorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from a processor call.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProcessorError {
    pub kind: ProcessorErrorKind,
    pub message: String,
}

/// The JSON error body returned by Google-style REST APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

impl ProcessorError {
    pub fn new(kind: ProcessorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Classify a failed HTTP response. The RPC status in the body, if any,
    /// wins over the HTTP status code.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(ErrorEnvelope { error }) => {
                let kind = error
                    .status
                    .as_deref()
                    .and_then(ProcessorErrorKind::from_rpc_status)
                    .unwrap_or_else(|| ProcessorErrorKind::from_http_status(status));
                let message = if error.message.is_empty() {
                    status.to_string()
                } else {
                    error.message
                };
                Self::new(kind, message)
            }
            Err(_) => Self::new(
                ProcessorErrorKind::from_http_status(status),
                format!("{status}: {}", body.trim()),
            ),
        }
    }
}

impl From<reqwest::Error> for ProcessorError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProcessorErrorKind::Timeout
        } else if let Some(status) = err.status() {
            ProcessorErrorKind::from_http_status(status)
        } else if err.is_connect() || err.is_request() {
            ProcessorErrorKind::NetworkError
        } else {
            ProcessorErrorKind::ProcessingError
        };
        Self::new(kind, format!("{err:#}"))
    }
}

impl IsKnownTransient for ProcessorError {
    fn is_known_transient(&self) -> bool {
        self.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        use ProcessorErrorKind::*;
        let retryable = [
            PermissionDenied,
            ResourceExhausted,
            InvalidArgument,
            DeadlineExceeded,
            NetworkError,
            QuotaExceeded,
            Timeout,
            AuthenticationError,
            InvalidDocument,
            ProcessingError,
        ]
        .into_iter()
        .filter(|k| k.is_retryable())
        .collect::<Vec<_>>();
        assert_eq!(retryable, vec![NetworkError, QuotaExceeded, Timeout]);
    }

    #[test]
    fn test_rpc_status_wins() {
        let body = r#"{"error": {"code": 429, "message": "Quota gone", "status": "RESOURCE_EXHAUSTED"}}"#;
        let err = ProcessorError::from_response(StatusCode::TOO_MANY_REQUESTS, body);
        assert_eq!(err.kind, ProcessorErrorKind::ResourceExhausted);
        assert_eq!(err.message, "Quota gone");
        assert!(!err.is_retryable());

        let body = r#"{"error": {"code": 401, "status": "UNAUTHENTICATED"}}"#;
        let err = ProcessorError::from_response(StatusCode::UNAUTHORIZED, body);
        assert_eq!(err.kind, ProcessorErrorKind::AuthenticationError);
    }

    #[test]
    fn test_http_status_fallback() {
        let err = ProcessorError::from_response(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert_eq!(err.kind, ProcessorErrorKind::QuotaExceeded);
        assert!(err.is_known_transient());

        let err = ProcessorError::from_response(StatusCode::GATEWAY_TIMEOUT, "");
        assert_eq!(err.kind, ProcessorErrorKind::Timeout);

        let err = ProcessorError::from_response(StatusCode::FORBIDDEN, "{}");
        assert_eq!(err.kind, ProcessorErrorKind::PermissionDenied);

        let err = ProcessorError::from_response(StatusCode::IM_A_TEAPOT, "");
        assert_eq!(err.kind, ProcessorErrorKind::ProcessingError);
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&ProcessorErrorKind::AuthenticationError).unwrap();
        assert_eq!(json, r#""AUTHENTICATION_ERROR""#);
        assert_eq!(ProcessorErrorKind::NetworkError.to_string(), "NETWORK_ERROR");
    }
}
