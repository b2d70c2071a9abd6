//! Error types for the healthchecks API client.
//!
//! # Design
//! Failures fall into three disjoint kinds that callers branch on:
//! transport (the exchange never produced a usable response), application
//! (the service answered with a status the operation did not expect) and
//! decode (the expected status arrived but the body did not match the
//! declared shape). `ApiError::kind` reports which one a value belongs to.

/// A failure below HTTP: connection refused, timeout, broken body stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    /// Whether another attempt could plausibly succeed.
    pub retryable: bool,
}

impl TransportError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Errors returned by `HealthchecksClient` operations.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The configured base address or a caller-supplied ping address is not
    /// a usable http(s) URL.
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The caller's cancellation token fired before a response was decoded.
    #[error("request cancelled")]
    Cancelled,

    /// The service answered with a status other than the one the operation
    /// expects. `message` is the service's `error` field, or empty when the
    /// body carried none.
    #[error("{operation} failed with {status}: {message}")]
    Status {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// The expected status arrived but the body did not decode.
    #[error("decoding {operation} response failed: {reason}")]
    Decode {
        operation: &'static str,
        reason: String,
    },

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Coarse classification of an `ApiError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Application,
    Decode,
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Transport(_) | ApiError::Cancelled => ErrorKind::Transport,
            ApiError::Status { .. }
            | ApiError::InvalidAddress { .. }
            | ApiError::Config(_)
            | ApiError::Serialization(_) => ErrorKind::Application,
            ApiError::Decode { .. } => ErrorKind::Decode,
        }
    }

    /// The HTTP status of an application failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ApiError>;
