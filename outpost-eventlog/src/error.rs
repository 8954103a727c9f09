//! Error types for outpost-eventlog.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from feedback store operations.
#[derive(Debug, Error)]
pub enum LogStoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Record payload (de)serialization error.
    #[error("record JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A frame that cannot be read; everything before `offset` is intact.
    #[error("corrupt store file {path} at offset {offset}: {reason}")]
    Corrupt {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// A single record does not fit the 32-bit length field.
    #[error("record of {size} bytes exceeds frame limit")]
    RecordTooLarge { size: usize },
}

/// Convenience constructor for [`LogStoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> LogStoreError {
    LogStoreError::Io {
        path: path.into(),
        source,
    }
}
