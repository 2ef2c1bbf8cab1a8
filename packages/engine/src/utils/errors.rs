// packages/engine/src/utils/errors.rs
//! Engine error taxonomy
//!
//! Only failures that a caller can act on are represented here. Filter
//! misses, unknown correlation keys, unparsable URLs and missing response
//! bodies are ordinary data paths and never become an `EngineError`.

use thiserror::Error;

/// Errors surfaced by the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Underlying storage ran out of space
    #[error("Storage full: {0}")]
    StorageFull(String),

    /// A persistence call failed (record store, backup ring, domain filter)
    #[error("Storage failed: {0}")]
    StorageFailed(String),

    /// A finalized record could not be handed to the writer
    #[error("Recording failed: {0}")]
    RecordingFailed(String),

    /// Rendering an export failed; no partial output is returned
    #[error("Export failed: {0}")]
    ExportFailed(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// HTTP control surface failure
    #[error("Server error: {0}")]
    ServerError(String),
}

impl EngineError {
    /// True for errors raised while writing to durable storage
    pub fn is_persistence(&self) -> bool {
        matches!(self, EngineError::StorageFull(_) | EngineError::StorageFailed(_))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == rusqlite::ErrorCode::DiskFull =>
            {
                EngineError::StorageFull(err.to_string())
            }
            _ => EngineError::StorageFailed(err.to_string()),
        }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;
