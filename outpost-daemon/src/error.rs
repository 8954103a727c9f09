use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the update controller, installers and agent runtime.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("config error: {0}")]
    Config(#[from] outpost_core::ConfigError),

    #[error("version error: {0}")]
    Parse(#[from] outpost_core::ParseError),

    #[error("transfer error: {0}")]
    Transfer(#[from] outpost_transfer::TransferError),

    #[error("feedback store error: {0}")]
    Store(#[from] outpost_eventlog::LogStoreError),

    #[error("sync error: {0}")]
    Sync(#[from] outpost_sync::SyncError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("install failed: {0}")]
    Install(String),

    #[error("stopped")]
    Stopped,

    #[error("agent is already running")]
    AlreadyRunning,

    #[error("{0} task join failure: {1}")]
    Join(&'static str, String),
}

impl DaemonError {
    /// Seconds the server asked us to wait, if this is a back-off signal.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            DaemonError::Transfer(err) => err.retry_after(),
            DaemonError::Sync(err) => err.retry_after(),
            _ => None,
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
