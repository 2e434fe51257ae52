//! Common error types for the frame manager

use thiserror::Error;

/// Common result type for frame manager operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the frame manager crates
#[derive(Error, Debug)]
pub enum Error {
    /// Store unavailable or busy (wraps sqlx::Error). Callers may retry.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reference to an unknown project, session, or file
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid caller input (empty name, non-positive target count, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Project name collision
    #[error("Project name already exists: {0}")]
    DuplicateName(String),

    /// Session identity already linked to a project
    #[error("Session already assigned: {0}")]
    AlreadyAssigned(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the store reported a transient busy/locked condition
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Database(db_err) => {
                let message = db_err.to_string();
                message.contains("database is locked") || message.contains("database is busy")
            }
            _ => false,
        }
    }

    /// True for validation and duplicate failures that callers surface to users
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_)
                | Error::DuplicateName(_)
                | Error::AlreadyAssigned(_)
                | Error::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors_are_not_retryable() {
        let err = Error::DuplicateName("M31 2024".to_string());
        assert!(err.is_user_error());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Project name already exists: M31 2024");
    }

    #[test]
    fn test_pool_timeout_is_not_lock_error() {
        let err = Error::Database(sqlx::Error::PoolTimedOut);
        assert!(!err.is_retryable());
        assert!(!err.is_user_error());
    }
}
