//! Error taxonomy shared by every capability and the sync surface (§7).

use thiserror::Error;

/// The category a caller needs to branch on: HTTP status mapping, retry
/// eligibility, and user messaging all key off this rather than the
/// underlying cause.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl CoreError {
    /// Whether a sync-queue worker should retry an op that failed with
    /// this error, per §7's propagation rules.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            CoreError::UpstreamUnavailable(_) | CoreError::StorageError(_)
        )
    }

    /// Stable machine-readable kind string, used in HTTP error bodies and
    /// log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InvalidInput(_) => "invalid_input",
            CoreError::NotFound(_) => "not_found",
            CoreError::Unauthorized(_) => "unauthorized",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::Conflict(_) => "conflict",
            CoreError::CapabilityUnavailable(_) => "capability_unavailable",
            CoreError::UpstreamUnavailable(_) => "upstream_unavailable",
            CoreError::StorageError(_) => "storage_error",
            CoreError::Cancelled => "cancelled",
            CoreError::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_categories() {
        assert!(CoreError::UpstreamUnavailable("x".into()).is_retriable());
        assert!(CoreError::StorageError("x".into()).is_retriable());
        assert!(!CoreError::InvalidInput("x".into()).is_retriable());
        assert!(!CoreError::NotFound("x".into()).is_retriable());
        assert!(!CoreError::Conflict("x".into()).is_retriable());
        assert!(!CoreError::Unauthorized("x".into()).is_retriable());
        assert!(!CoreError::Forbidden("x".into()).is_retriable());
        assert!(!CoreError::CapabilityUnavailable("x".into()).is_retriable());
    }

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(CoreError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(CoreError::Cancelled.kind(), "cancelled");
    }
}
