//! Error types for rate limiting operations.
//!
//! Only infrastructure faults and configuration mistakes are errors. A request
//! that exceeds its budget is a normal [`Decision`](crate::Decision) and never
//! shows up here.

use std::time::Duration;
use thiserror::Error;

/// Result type for rate limiting operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Main error type for rate limiting operations.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// State backend or shared store error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid construction parameters.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connection to the shared store failed.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// The caller supplied an unusable key.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The call did not finish before the caller's deadline.
    #[error("Rate limit check timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the call.
    #[error("Rate limit check cancelled")]
    Cancelled,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RateLimitError {
    /// Whether a caller may reasonably retry the same call.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_retryable(),
            Self::Connection(_) | Self::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Storage-related errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Generic storage operation failed.
    #[error("{message}")]
    OperationFailed {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A state record could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A persisted record exists but does not decode.
    #[error("Corrupt record at {key}: {message}")]
    Decode {
        /// Store key of the record.
        key: String,
        /// Decoder message.
        message: String,
    },

    /// Optimistic update kept losing to concurrent writers.
    #[error("Atomic update gave up after {attempts} conflicting attempts")]
    AtomicConflict {
        /// Number of compare-and-set attempts made.
        attempts: u32,
    },

    /// The store does not know the requested atomic script.
    #[error("Unknown atomic script: {0}")]
    UnknownScript(String),

    /// An atomic script returned a reply of the wrong shape.
    #[error("Malformed reply from script {script}: {message}")]
    MalformedReply {
        /// Script id.
        script: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// Connection pool exhausted.
    #[error("Connection pool exhausted")]
    PoolExhausted,
}

impl StorageError {
    /// Create a new operation failed error.
    pub fn operation_failed(message: impl Into<String>, retryable: bool) -> Self {
        Self::OperationFailed {
            message: message.into(),
            retryable,
        }
    }

    /// Create a decode error for the record stored at `key`.
    pub fn decode(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::OperationFailed { retryable, .. } => *retryable,
            Self::AtomicConflict { .. } => true,
            Self::PoolExhausted => true,
            _ => false,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Capacity (max tokens, max level or window budget) must be positive.
    #[error("capacity must be greater than 0, got {0}")]
    InvalidCapacity(f64),

    /// Refill or leak rate must be positive and finite.
    #[error("rate must be a positive finite number, got {0}")]
    InvalidRate(f64),

    /// Window duration must be at least one millisecond and at most
    /// [`MAX_RECORD_TTL`](crate::config::MAX_RECORD_TTL).
    #[error("window must be between 1ms and 100 years, got {0:?}")]
    InvalidWindow(Duration),

    /// Key namespace must be non-empty.
    #[error("namespace must not be empty")]
    EmptyNamespace,
}

/// Connection-related errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Failed to connect.
    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),

    /// Connection timeout.
    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),

    /// Connection closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    Closed,
}
