//! Error types for the I/O layer.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for I/O operations.
pub type OpsResult<T> = Result<T, OpsError>;

/// Errors that can occur outside of backend calls.
#[derive(Debug, Error)]
pub enum OpsError {
    /// A backend call failed.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// The persisted state location cannot be used.
    #[error("Storage unavailable at {path}: {message}")]
    StorageUnavailable { path: PathBuf, message: String },

    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl OpsError {
    /// Create a storage error for a path.
    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// How a failure should be presented and whether retrying makes sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or rejected input (client-side checks and HTTP 4xx).
    Validation,
    /// Connection failures and timeouts.
    Network,
    /// HTTP 5xx.
    Server,
    /// A response or document that could not be decoded.
    Parse,
    /// The request was superseded and aborted.
    Cancelled,
}

/// A failed backend request.
///
/// Cloneable so it can be cached against the key that produced it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend rejected the request (HTTP 4xx).
    #[error("{endpoint} rejected the request ({status}): {detail}")]
    Rejected {
        endpoint: String,
        status: u16,
        detail: String,
    },

    /// The backend failed while handling the request (HTTP 5xx).
    #[error("Server error {status} from {endpoint}: {detail}")]
    Server {
        endpoint: String,
        status: u16,
        detail: String,
    },

    /// The backend could not be reached or did not answer in time.
    #[error("Network error calling {endpoint}: {message}")]
    Network { endpoint: String, message: String },

    /// The response body did not have the expected shape.
    #[error("Unexpected response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    /// The request was aborted because its result was no longer wanted.
    #[error("Request to {endpoint} was cancelled")]
    Cancelled { endpoint: String },
}

impl BackendError {
    /// Classify the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::Rejected { .. } => ErrorKind::Validation,
            BackendError::Server { .. } => ErrorKind::Server,
            BackendError::Network { .. } => ErrorKind::Network,
            BackendError::Decode { .. } => ErrorKind::Parse,
            BackendError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Only transport failures are worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Network
    }

    /// Build the error matching an HTTP status.
    pub fn from_status(endpoint: impl Into<String>, status: u16, detail: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let detail = detail.into();
        if status >= 500 {
            BackendError::Server {
                endpoint,
                status,
                detail,
            }
        } else {
            BackendError::Rejected {
                endpoint,
                status,
                detail,
            }
        }
    }

    pub fn network(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        BackendError::Network {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn decode(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        BackendError::Decode {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    pub fn cancelled(endpoint: impl Into<String>) -> Self {
        BackendError::Cancelled {
            endpoint: endpoint.into(),
        }
    }
}
