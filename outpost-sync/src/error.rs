//! Error types for outpost-sync.

use thiserror::Error;

use outpost_core::ParseError;
use outpost_eventlog::LogStoreError;
use outpost_transfer::TransferError;

/// All errors that can arise from feedback synchronization.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Talking to the server failed, or the server asked us to back off.
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Reading the local feedback store failed.
    #[error("feedback store error: {0}")]
    Store(#[from] LogStoreError),

    /// The server's range answer could not be parsed.
    #[error("bad range from server: {0}")]
    Range(#[from] ParseError),
}

impl SyncError {
    /// Seconds the server asked us to wait, if this is a back-off signal.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            SyncError::Transfer(err) => err.retry_after(),
            _ => None,
        }
    }
}
