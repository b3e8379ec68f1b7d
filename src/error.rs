//! Error types for the portfolio engine
//!
//! This module provides structured error definitions using thiserror, with
//! anyhow errors folded into [`PortfolioError::Other`] at the boundary.

use thiserror::Error;

/// Main error type for portfolio operations
#[derive(Error, Debug)]
pub enum PortfolioError {
    /// Network or authentication failure talking to the remote store
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    /// Folder or file absent on the remote store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Folder name that cannot be tokenized into criteria codes
    #[error("Malformed folder name: {0}")]
    MalformedFolderName(String),

    /// A status patch raced with another writer
    #[error("Concurrent write conflict on {0}")]
    ConcurrentWriteConflict(String),

    /// Assessment status change outside the allowed state machine
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Unit code not present in the qualification catalogue
    #[error("Unknown unit: {0}")]
    UnknownUnit(String),

    /// Site id not present in configuration
    #[error("Unknown site: {0}")]
    UnknownSite(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client construction or protocol error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl PortfolioError {
    /// Whether the failed call may succeed if issued again
    pub fn is_retryable(&self) -> bool {
        matches!(self, PortfolioError::RemoteUnavailable(_))
    }
}

/// Result type alias for portfolio operations
pub type Result<T> = std::result::Result<T, PortfolioError>;

/// Convert anyhow::Error to PortfolioError
impl From<anyhow::Error> for PortfolioError {
    fn from(err: anyhow::Error) -> Self {
        PortfolioError::Other(err.to_string())
    }
}
