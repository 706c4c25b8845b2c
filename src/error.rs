//! Error types for the bugbot gateway

use thiserror::Error;

/// Result type alias for bugbot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the bugbot gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Chat platform error
    #[error("chat error: {0}")]
    Chat(String),

    /// Issue analysis error
    #[error("analysis error: {0}")]
    Analysis(String),

    /// GitHub API error
    #[error("github error: {0}")]
    GitHub(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
