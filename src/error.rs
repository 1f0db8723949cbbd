//! Caller-visible error taxonomy.
//!
//! Callers see one of [`ProxyError::InvalidInput`], [`ProxyError::Transport`]
//! or [`ProxyError::Remote`]. [`ProxyError::Release`] only reaches a caller
//! who explicitly asked to release an artifact; on cleanup paths release
//! failures are logged and dropped.

use thiserror::Error;

use crate::key::RemoteKey;
use crate::transport::TransportError;

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Errors returned by frame and model proxies.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// An argument was empty or malformed. Detected before any request.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The request could not be completed or the response was unusable.
    #[error(transparent)]
    Transport(TransportError),

    /// The cluster rejected the request.
    #[error("cluster error: {message} (code: {code})")]
    Remote {
        /// Error code from the cluster.
        code: String,
        /// Error message from the cluster.
        message: String,
    },

    /// Releasing an artifact failed.
    #[error("failed to release {key}: {source}")]
    Release {
        /// Key that could not be released.
        key: RemoteKey,
        /// Underlying failure.
        #[source]
        source: TransportError,
    },
}

impl ProxyError {
    /// Create an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Check if this is an invalid-input error.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    /// Check if the cluster rejected the request.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// Check if this is a transport error.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<TransportError> for ProxyError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Remote { code, message } => Self::Remote { code, message },
            other => Self::Transport(other),
        }
    }
}
