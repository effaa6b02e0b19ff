//! Error types for jotsync-core

use thiserror::Error;

use crate::auth::AuthError;

/// Result type alias using jotsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in jotsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Identity provider error
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Structured-data API error
    #[error("API error: {0}")]
    Api(String),

    /// Object storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Note not found
    #[error("Note not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation requires an active session
    #[error("Not signed in")]
    NotSignedIn,
}
