//! Error taxonomy for the scan console core.
//!
//! [`ApiError`] describes what went wrong talking to the remote API.
//! [`ConsoleError`] is what callers of the controller and workflow see,
//! already classified into how the failure should be recovered.

use thiserror::Error;

/// Failure of a single request to the remote API.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    /// The request never produced an HTTP response (connect, timeout, ...).
    #[error("request failed: {0}")]
    Transport(String),
    /// The server answered with a non-success status.
    #[error("server returned {status}: {detail}")]
    Status { status: u16, detail: String },
    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Errors surfaced to the operator-facing layers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConsoleError {
    /// Malformed target, intensity or name. Shown inline, step does not advance.
    #[error("{0}")]
    Validation(String),
    /// A scan is already active on the backend.
    #[error("{0}")]
    Conflict(String),
    /// Request failure that is retried on the next cycle.
    #[error("network error: {0}")]
    TransientNetwork(String),
    /// The backend reported the scan as failed. Never retried automatically.
    #[error("scan failed: {0}")]
    RemoteTaskFailure(String),
    /// The scanner registry had nothing able to service the scan.
    #[error("no scanner is available to run this scan")]
    NoScannerAvailable,
}

impl ConsoleError {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ConsoleError::RemoteTaskFailure(_))
    }
}

impl From<ApiError> for ConsoleError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Status { status: 409, detail } => ConsoleError::Conflict(detail),
            ApiError::Status { status: 400, detail } if mentions_active_scan(&detail) => {
                ConsoleError::Conflict(detail)
            }
            ApiError::Status {
                status: 400 | 422,
                detail,
            } => ConsoleError::Validation(detail),
            other => ConsoleError::TransientNetwork(other.to_string()),
        }
    }
}

/// Some backends answer a concurrent create with a plain 400.
fn mentions_active_scan(detail: &str) -> bool {
    let detail = detail.to_ascii_lowercase();
    detail.contains("already") && (detail.contains("active") || detail.contains("running"))
}
