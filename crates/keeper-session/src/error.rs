//! Error types for session engine operations.

use std::path::PathBuf;

/// Error type for session engine operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading, writing or unlinking a session file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A session file failed structural validation.
    #[error("Corrupt session data: {0}")]
    Corrupt(String),

    /// The value tree block ended before a read could complete.
    #[error("Truncated session data: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    /// The value tree nests deeper than the decoder allows.
    #[error("Value tree nesting exceeds {0} levels")]
    DepthExceeded(usize),

    /// A key is too long to be framed without colliding with the sentinels.
    #[error("Key length {0} exceeds the maximum encodable length")]
    KeyTooLong(usize),

    /// A session identifier is not 32 alphanumeric characters.
    #[error("Invalid session id: {0:?}")]
    InvalidId(String),

    /// No session file exists for the id.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// The session exists but is past its lifetime or idle timeout.
    #[error("Session expired: {0}")]
    Expired(String),

    /// The session directory is missing or unusable.
    #[error("Session directory '{path}' is unusable: {reason}")]
    Directory { path: PathBuf, reason: String },
}

impl Error {
    /// True if the bytes themselves are bad, as opposed to missing or stale.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::Corrupt(_) | Error::Truncated { .. } | Error::DepthExceeded(_)
        )
    }
}

/// Result type for session engine operations.
pub type Result<T> = std::result::Result<T, Error>;
