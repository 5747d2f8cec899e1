//! Error types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single chain read
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl ReadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReadError::Connectivity(_) => ErrorKind::Connectivity,
            ReadError::Contract(_) => ErrorKind::Contract,
            ReadError::MalformedResponse(_) => ErrorKind::MalformedResponse,
        }
    }

    /// Malformed data will not fix itself within a cycle
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReadError::MalformedResponse(_))
    }
}

/// Transport-level failures from a chain endpoint
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timed out")]
    Timeout,

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<TransportError> for ReadError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connection(_) | TransportError::Timeout => {
                ReadError::Connectivity(err.to_string())
            }
            TransportError::Rpc { .. } => ReadError::Contract(err.to_string()),
            TransportError::InvalidResponse(msg) => ReadError::MalformedResponse(msg),
        }
    }
}

/// Live event feed could not attach or was lost
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("Subscription unavailable: {0}")]
    Unavailable(String),

    #[error("Subscription closed")]
    Closed,
}

impl From<TransportError> for SubscriptionError {
    fn from(err: TransportError) -> Self {
        SubscriptionError::Unavailable(err.to_string())
    }
}

/// Configuration problems detected before anything connects
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing {field} for {chain} chain")]
    Missing { chain: &'static str, field: &'static str },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Read error category, as shown to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connectivity,
    Contract,
    MalformedResponse,
}

/// Terminal error of one refresh cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
    pub at: DateTime<Utc>,
}

impl ErrorInfo {
    pub fn from_read_error(err: &ReadError, attempts: u32) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            attempts,
            at: Utc::now(),
        }
    }
}

/// Result type aliases
pub type ReadResult<T> = Result<T, ReadError>;
pub type TransportResult<T> = Result<T, TransportError>;
pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_mapping() {
        let err: ReadError = TransportError::Timeout.into();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert!(err.is_retryable());

        let err: ReadError = TransportError::Rpc {
            code: 3,
            message: "execution reverted".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Contract);
        assert!(err.is_retryable());

        let err: ReadError = TransportError::InvalidResponse("short".to_string()).into();
        assert_eq!(err, ReadError::MalformedResponse("short".to_string()));
        assert!(!err.is_retryable());
    }
}
