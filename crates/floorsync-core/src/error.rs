//! Error types for floorsync-core

use thiserror::Error;

/// Result type alias using floorsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in floorsync-core operations
///
/// Per-item network failures during a drain are not errors; they are reported
/// through [`crate::client::ApplyOutcome`] and recorded on the queued change.
#[derive(Error, Debug)]
pub enum Error {
    /// Durable storage failed; the triggering operation made no state change
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A sync was requested while the connectivity monitor reports offline
    #[error("Cannot sync while offline")]
    Offline,

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}
