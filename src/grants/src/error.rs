//! Error types for grant enumeration

use thiserror::Error;

/// Grant enumeration errors
#[derive(Debug, Error)]
pub enum GrantError {
    /// The decision oracle or the tuple store could not be consulted
    #[error("Oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// Enumeration completed but produced nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// The enclosing request was cancelled before enumeration finished
    #[error("Enumeration cancelled")]
    Cancelled,

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Malformed policy or role-assignment tuple
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GrantError {
    /// Whether this error means "no access" rather than a failure to decide
    pub fn is_not_found(&self) -> bool {
        matches!(self, GrantError::NotFound(_))
    }
}

/// Result type for grant enumeration
pub type Result<T> = std::result::Result<T, GrantError>;
