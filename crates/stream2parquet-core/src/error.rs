//! Error types shared across the sink

use thiserror::Error;

/// Errors that can occur anywhere in the commit core.
///
/// The variants form the failure taxonomy of the sink:
/// - `Config` is fatal at setup time and never silently skipped
/// - `Io` is a store/transport failure; fatal when it hits a WAL append
/// - `Recovery` means a logged commit unit lost both its temp and final
///   file, which indicates store-level data loss and halts the shard
/// - `Format` is fatal for the file being written; the temp file is
///   abandoned and deleted, never committed
#[derive(Debug, Error)]
pub enum SinkError {
    /// Bad or unknown partition-function / writer-provider configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Store or transport failure
    #[error("storage i/o failure: {0}")]
    Io(String),

    /// Listing a path that does not exist
    #[error("path not found: {0}")]
    NotFound(String),

    /// WAL replay found a commit unit whose temp and final file are both gone
    #[error("recovery failed for shard {shard}: {reason}")]
    Recovery { shard: String, reason: String },

    /// Schema projection or record encoding failure
    #[error("record format error: {0}")]
    Format(String),
}

impl SinkError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn io(message: impl std::fmt::Display) -> Self {
        Self::Io(message.to_string())
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    pub fn recovery(shard: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::Recovery {
            shard: shard.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for SinkError
pub type Result<T> = std::result::Result<T, SinkError>;
