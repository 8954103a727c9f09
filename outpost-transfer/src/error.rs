//! Error types for outpost-transfer.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Retry delay used when a 503 carries no usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

/// All errors that can arise while talking to the server or writing the
/// staging file.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Local disk failure, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Connectivity failure (DNS, refused, reset, timeout).
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// The server answered something this client cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server asked us to back off (HTTP 503).
    #[error("server busy, retry after {secs}s")]
    RetryAfter { secs: u64 },

    /// `start()` was called while a transfer is still in flight.
    #[error("a transfer is already in progress for this handle")]
    AlreadyStarted,

    /// `wait()` was called without a prior `start()`.
    #[error("no transfer has been started for this handle")]
    NotStarted,
}

impl TransferError {
    /// Suggested delay when this is a back-off signal.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            TransferError::RetryAfter { secs } => Some(*secs),
            _ => None,
        }
    }

    /// Recover a `TransferError` that travelled through `std::io::Read`.
    ///
    /// Errors raised by the stream itself are unwrapped; genuine socket
    /// errors become [`TransferError::Transport`].
    pub fn from_io(url: &str, err: io::Error) -> Self {
        if err
            .get_ref()
            .map(|inner| inner.is::<TransferError>())
            .unwrap_or(false)
        {
            if let Some(inner) = err.into_inner() {
                if let Ok(transfer) = inner.downcast::<TransferError>() {
                    return *transfer;
                }
            }
            return TransferError::Protocol("unrecoverable stream error".to_string());
        }
        TransferError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    /// Wrap for transport through `std::io::Read`.
    pub(crate) fn into_io(self) -> io::Error {
        io::Error::other(self)
    }
}

/// Convenience constructor for [`TransferError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: io::Error) -> TransferError {
    TransferError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_io_recovers_wrapped_error() {
        let wrapped = TransferError::RetryAfter { secs: 45 }.into_io();
        let recovered = TransferError::from_io("http://x", wrapped);
        assert_eq!(recovered.retry_after(), Some(45));
    }

    #[test]
    fn from_io_maps_plain_errors_to_transport() {
        let err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let mapped = TransferError::from_io("http://x/a", err);
        assert!(
            matches!(mapped, TransferError::Transport { ref url, .. } if url == "http://x/a"),
            "got: {mapped}"
        );
    }
}
