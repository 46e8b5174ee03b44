//! Error types for the rate-limit decision service.
//!
//! The public admin surface (`ResolveConfig`, `SetKeyConfig`, ...) returns
//! real `Result`s. The decision path itself never propagates an error to its
//! caller: per the error-handling design, transport and validation failures
//! are logged and collapsed into a deny (see [`crate::decision::Decision`]).

use thiserror::Error;

/// Result type for rate-limit operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// KV store backend error (local or remote).
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Remote connection error.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Neither backend could service the request.
    #[error("no backend available")]
    BackendUnavailable,

    /// The service is shutting down; no new decisions are accepted.
    #[error("shutdown in progress")]
    ShutdownInProgress,

    /// Internal invariant violated.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Storage-related errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Generic storage operation failed.
    #[error("{message}")]
    OperationFailed {
        /// Human readable message.
        message: String,
        /// Whether retrying might succeed.
        retryable: bool,
    },

    /// Serialization/deserialization of a persisted entry failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The atomic script returned a malformed or unexpected result tuple.
    #[error("malformed script result: {0}")]
    MalformedResult(String),

    /// Connection pool exhausted.
    #[error("connection pool exhausted")]
    PoolExhausted,
}

impl StorageError {
    /// Build an operation-failed error.
    pub fn operation_failed(message: impl Into<String>, retryable: bool) -> Self {
        Self::OperationFailed {
            message: message.into(),
            retryable,
        }
    }

    /// Whether the failed operation may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::OperationFailed { retryable: true, .. } | Self::PoolExhausted
        )
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A `LimitConfig` failed validation (e.g. non-positive capacity).
    #[error("invalid limit config: {0}")]
    InvalidLimitConfig(String),

    /// A pattern could not be compiled (only `*` is a valid metacharacter).
    #[error("invalid key pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A composite definition was malformed (e.g. empty component list).
    #[error("invalid composite definition: {0}")]
    InvalidComposite(String),
}

/// Remote-transport errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Failed to establish or obtain a connection.
    #[error("failed to connect: {0}")]
    ConnectionFailed(String),

    /// The call exceeded its deadline.
    #[error("connection timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Connection dropped mid-call.
    #[error("connection closed unexpectedly")]
    Closed,
}
