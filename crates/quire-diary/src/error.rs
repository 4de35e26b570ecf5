//! Error types for the diary service.

use thiserror::Error;

use quire_authz::AuthzError;
use quire_store::{ConflictExhausted, StoreError};

/// Result type alias for diary operations.
pub type Result<T> = std::result::Result<T, DiaryError>;

/// Errors surfaced to callers of the diary service.
///
/// Embedding and propagation failures never appear here: they are logged
/// and the operation's outcome is decided by the local commit alone.
#[derive(Debug, Error)]
pub enum DiaryError {
    /// The resource is absent, or the caller may not know it exists.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller can see the resource but may not perform the action.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Serialization conflicts persisted through every retry.
    #[error("Conflict retries exhausted for {operation} after {attempts} attempts")]
    ConflictExhausted { operation: String, attempts: u32 },

    /// Malformed or contradictory input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The caller is not a registered agent.
    #[error("Unauthorized")]
    Unauthorized,

    /// Persistence failure.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// The permission oracle could not answer a check.
    #[error("Authorization error: {0}")]
    Authz(#[from] AuthzError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DiaryError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn forbidden(what: impl Into<String>) -> Self {
        Self::Forbidden(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether the caller should back off and retry later.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::ConflictExhausted { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<ConflictExhausted> for DiaryError {
    fn from(err: ConflictExhausted) -> Self {
        Self::ConflictExhausted {
            operation: err.operation,
            attempts: err.attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_exhausted_is_rate_limited() {
        let err = DiaryError::from(ConflictExhausted {
            operation: "create_entry".into(),
            attempts: 5,
        });
        assert!(err.is_rate_limited());
        assert!(err.to_string().contains("create_entry"));
        assert!(!DiaryError::Unauthorized.is_rate_limited());
    }

    #[test]
    fn test_store_error_keeps_source_chain() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let err = DiaryError::from(StoreError::from(busy));
        assert!(quire_store::is_serialization_conflict(&err));
        assert!(std::error::Error::source(&err).is_some());
    }
}
