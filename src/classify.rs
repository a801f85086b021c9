//! Failure classification
//!
//! Decides whether a store failure is worth retrying. Depends only on the
//! failure kind, never on the message text.

use crate::error::{FailureKind, StoreFailure};

/// Whether a failure may succeed on retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Timeouts, rate limiting, temporary unavailability
    Transient,

    /// Permission denial, not-found, malformed request, anything unrecognized
    Terminal,
}

impl FailureClass {
    pub fn is_transient(&self) -> bool {
        matches!(self, FailureClass::Transient)
    }
}

/// Classify a store failure
///
/// Unrecognized failures are terminal.
pub fn classify(cause: &StoreFailure) -> FailureClass {
    classify_kind(cause.kind)
}

/// Classify a bare failure kind
pub fn classify_kind(kind: FailureKind) -> FailureClass {
    match kind {
        FailureKind::Timeout | FailureKind::RateLimited | FailureKind::Unavailable => {
            FailureClass::Transient
        }
        FailureKind::PermissionDenied
        | FailureKind::NotFound
        | FailureKind::InvalidRequest
        | FailureKind::Unknown => FailureClass::Terminal,
    }
}
