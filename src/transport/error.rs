//! Transport-level error types.

use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur while talking to the cluster.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Could not reach the cluster at all.
    #[error("failed to connect to cluster: {0}")]
    Connect(String),

    /// Request timed out waiting for response.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// The cluster answered with a non-success status that carried no
    /// recognisable error envelope.
    #[error("cluster returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body (possibly truncated).
        body: String,
    },

    /// Failed to serialize request parameters.
    #[error("failed to serialize request: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    /// The response did not match the expected schema.
    #[error("unexpected response from cluster: {0}")]
    InvalidResponse(String),

    /// The cluster reported a domain-level failure.
    #[error("cluster error: {message} (code: {code})")]
    Remote {
        /// Error code from the cluster.
        code: String,
        /// Error message from the cluster.
        message: String,
    },

    /// The local runtime driving the transport could not be created.
    #[error("transport runtime error: {0}")]
    Runtime(#[source] std::io::Error),
}

impl TransportError {
    /// Create a remote error from an error response.
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    /// Check if the cluster itself rejected the request.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// Check if the cluster reported that the addressed key does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Remote { code, .. } if code == "NOT_FOUND" || code == "404")
    }

    /// Check if this error is retriable.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(0)
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Connect(err.to_string())
        }
    }
}
