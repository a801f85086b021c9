//! Error types for docbridge
//!
//! `BridgeError` is what crosses the crate boundary. `StoreFailure` is the raw
//! cause reported by a store; the access layer wraps it into `Read`/`Write`
//! once it has decided not to (or no longer to) retry.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Result of a raw store call, before classification
pub type StoreResult<T> = std::result::Result<T, StoreFailure>;

/// Unified error type for docbridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    /// Bad input shape: malformed filter, invalid config, batch overflow
    #[error("Configuration error: {0}")]
    Configuration(String),

    // -------------------------------------------------------------------------
    // Connection Errors
    // -------------------------------------------------------------------------
    /// Handle initialization or handshake failed
    #[error("Connection error: {0}")]
    Connection(String),

    // -------------------------------------------------------------------------
    // Operation Errors
    // -------------------------------------------------------------------------
    /// A read or query gave up, either on a terminal failure or after the retry budget
    #[error("Read of {target} failed after {attempts} attempt(s): {cause}")]
    Read {
        target: String,
        attempts: u32,
        cause: StoreFailure,
    },

    /// A batch commit failed; nothing was applied
    #[error("Commit of {operations} operation(s) failed: {cause}")]
    Write {
        operations: usize,
        cause: StoreFailure,
    },

    /// An external cancellation or deadline fired
    #[error("Cancelled: {0}")]
    Cancelled(String),

    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BridgeError {
    /// Attempt count for read failures
    pub fn attempts(&self) -> Option<u32> {
        match self {
            BridgeError::Read { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Underlying store failure, if this error wraps one
    pub fn cause(&self) -> Option<&StoreFailure> {
        match self {
            BridgeError::Read { cause, .. } | BridgeError::Write { cause, .. } => Some(cause),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BridgeError::Cancelled(_))
    }
}

impl From<bincode::Error> for BridgeError {
    fn from(e: bincode::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

/// Kind of failure reported by a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    Timeout,
    RateLimited,
    Unavailable,
    PermissionDenied,
    NotFound,
    InvalidRequest,
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited => "rate limited",
            FailureKind::Unavailable => "unavailable",
            FailureKind::PermissionDenied => "permission denied",
            FailureKind::NotFound => "not found",
            FailureKind::InvalidRequest => "invalid request",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl From<std::io::ErrorKind> for FailureKind {
    fn from(kind: std::io::ErrorKind) -> Self {
        use std::io::ErrorKind;

        match kind {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => FailureKind::Timeout,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::NotConnected => FailureKind::Unavailable,
            ErrorKind::PermissionDenied => FailureKind::PermissionDenied,
            ErrorKind::InvalidInput | ErrorKind::InvalidData => FailureKind::InvalidRequest,
            _ => FailureKind::Unknown,
        }
    }
}

/// A raw failure cause as reported by a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl StoreFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unavailable, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(FailureKind::PermissionDenied, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidRequest, message)
    }
}

impl fmt::Display for StoreFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for StoreFailure {}

impl From<std::io::Error> for StoreFailure {
    fn from(e: std::io::Error) -> Self {
        StoreFailure::new(e.kind().into(), e.to_string())
    }
}

impl From<BridgeError> for StoreFailure {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::Io(io) => io.into(),
            BridgeError::Read { cause, .. } | BridgeError::Write { cause, .. } => cause,
            BridgeError::Cancelled(msg) => StoreFailure::timeout(msg),
            BridgeError::Configuration(msg) => StoreFailure::invalid_request(msg),
            BridgeError::Connection(msg) => StoreFailure::unavailable(msg),
            other => StoreFailure::new(FailureKind::Unknown, other.to_string()),
        }
    }
}
