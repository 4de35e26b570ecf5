//! Error types for the authorization crate.

use thiserror::Error;

/// Result type alias for oracle operations.
pub type Result<T> = std::result::Result<T, AuthzError>;

/// Errors talking to the permission oracle.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// The oracle could not be reached or timed out.
    #[error("Oracle unreachable: {0}")]
    Transport(String),

    /// The oracle answered with an unexpected status.
    #[error("Oracle returned HTTP {status}: {body}")]
    Backend { status: u16, body: String },

    /// The oracle response could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored tuple could not be interpreted.
    #[error("Invalid tuple: {0}")]
    InvalidTuple(String),
}

impl From<reqwest::Error> for AuthzError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AuthzError::Serialization(err.to_string())
        } else {
            AuthzError::Transport(err.to_string())
        }
    }
}
