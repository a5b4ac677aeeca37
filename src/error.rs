//! Closed error taxonomy surfaced to protocol clients.
//!
//! Every failure that leaves the crate's core (upstream client, search
//! aggregator, parameter validation, protocol server) is one of the
//! [`ApiError`] variants below. Transport-level
//! failures (`reqwest` errors, timeouts, bad status codes) are normalized
//! into this taxonomy inside [`crate::client`] and never escape it.
//!
//! | Kind | Retriable | Typical cause |
//! |------|-----------|---------------|
//! | `InvalidParameters` | no | missing/malformed field, bad URI, upstream 4xx |
//! | `NotFound` | no | upstream 404 |
//! | `Unauthorized` | no | upstream 401/403 |
//! | `Transient` | yes | network error, upstream 5xx or 429 |
//! | `Transient` | no | upstream answered with a payload of the wrong shape |
//! | `Timeout` | yes | per-request deadline exceeded |
//! | `PartialFailure` | yes | some datasets of a multi-dataset search failed |
//! | `MethodNotFound` | no | unknown tool/resource method |
//! | `ServerShuttingDown` | no | request arrived while draining |

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Machine-readable error kind, serialized in the response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidParameters,
    NotFound,
    Unauthorized,
    Transient,
    Timeout,
    PartialFailure,
    MethodNotFound,
    ServerShuttingDown,
}

impl ErrorKind {
    /// Whether a caller may reasonably retry the same request unchanged.
    pub fn retriable(self) -> bool {
        matches!(
            self,
            ErrorKind::Transient | ErrorKind::Timeout | ErrorKind::PartialFailure
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidParameters => "InvalidParameters",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::Transient => "Transient",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::PartialFailure => "PartialFailure",
            ErrorKind::MethodNotFound => "MethodNotFound",
            ErrorKind::ServerShuttingDown => "ServerShuttingDown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain error returned by every core operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// The upstream answered, but not in the shape we decode. Reported as
    /// `Transient` on the wire; repeating the request would return the same.
    #[error("unexpected upstream payload: {0}")]
    UnexpectedPayload(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Some legs of a fan-out succeeded, others failed. `details` carries the
    /// surviving payload plus per-leg attribution.
    #[error("partial failure: {message}")]
    PartialFailure { message: String, details: Value },

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("server is shutting down")]
    ServerShuttingDown,
}

impl ApiError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ApiError::InvalidParameters(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::InvalidParameters(_) => ErrorKind::InvalidParameters,
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::Unauthorized(_) => ErrorKind::Unauthorized,
            ApiError::Transient(_) | ApiError::UnexpectedPayload(_) => ErrorKind::Transient,
            ApiError::Timeout(_) => ErrorKind::Timeout,
            ApiError::PartialFailure { .. } => ErrorKind::PartialFailure,
            ApiError::MethodNotFound(_) => ErrorKind::MethodNotFound,
            ApiError::ServerShuttingDown => ErrorKind::ServerShuttingDown,
        }
    }

    pub fn retriable(&self) -> bool {
        match self {
            ApiError::UnexpectedPayload(_) => false,
            other => other.kind().retriable(),
        }
    }

    /// Structured details attached to the error, if any.
    pub fn details(&self) -> Option<&Value> {
        match self {
            ApiError::PartialFailure { details, .. } => Some(details),
            _ => None,
        }
    }

    /// Maps an upstream HTTP status code (non-2xx) to the taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => ApiError::Unauthorized(message),
            404 => ApiError::NotFound(message),
            408 | 429 => ApiError::Transient(message),
            s if s >= 500 => ApiError::Transient(message),
            _ => ApiError::InvalidParameters(message),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
