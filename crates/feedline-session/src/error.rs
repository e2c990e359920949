//! Error types for session manager operations.

use feedline_types::{RequestError, StoreError};

/// Error type for session manager operations.
///
/// Task bodies log these and treat the unit of work as a no-op. Only the
/// builder and diagnostic accessors return them to callers.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Session is not tracked by the manager.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Error from the persistent store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Error from the request layer.
    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    /// A data operation is missing its content id or payload.
    #[error("Invalid data operation: {0}")]
    InvalidOperation(String),

    /// The manager was built without a required collaborator.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for session manager operations.
pub type Result<T> = std::result::Result<T, SessionError>;
