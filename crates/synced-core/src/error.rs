//! Error types for synced-core

use thiserror::Error;

/// Result type alias using synced-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in synced-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store rejected a record's attributes
    #[error("Validation failed for {model}: {message}")]
    Validation { model: String, message: String },

    /// Sync configuration is unusable; raised before any record is touched
    #[error("Configuration error: {0}")]
    Config(String),

    /// Remote data could not be fetched
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// A mapper could not translate a remote record
    #[error("Mapping failed: {0}")]
    Mapping(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
