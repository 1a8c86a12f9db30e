//! Error types for the reconciliation engine

use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for reconciliation operations
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Reconciliation errors
///
/// Row-level variants (`Transient`, `DefinitiveRejection`, row `Io`) are
/// aggregated into summaries. `Format` and `Io` on the playlist file abort one
/// playlist; `ConcurrencyConflict` and `Config` abort the station run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Playlist file could not be parsed as a whole
    #[error("Format error in {path}: {message}")]
    Format { path: PathBuf, message: String },

    /// External collaborator failed in a way that may succeed later
    #[error("Transient error: {0}")]
    Transient(String),

    /// Album lookup says the library entry is wrong
    #[error("Definitive rejection: {0}")]
    DefinitiveRejection(String),

    /// Filesystem failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Audio source has nothing for a row
    #[error("Source not found: {0}")]
    NotFound(String),

    /// Embedded tags could not be read or written
    #[error("Tag error on {path}: {message}")]
    Tag { path: PathBuf, message: String },

    /// Another run holds the station lock
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Run was interrupted or timed out
    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Common(#[from] ncast_common::Error),
}

impl SyncError {
    /// Wrap an I/O error with the path it occurred on
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// True for failures that a later run may not hit again
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_) | SyncError::Cancelled(_))
    }
}

/// A playlist row that could not be parsed and was skipped
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct RowFormatError {
    /// 1-based line number in the playlist file
    pub line: u64,
    pub message: String,
}
