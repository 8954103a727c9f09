//! # outpost-transfer
//!
//! Resumable content transfer over byte-range HTTP.
//!
//! - [`http`] — the [`HttpConnector`] seam and its `ureq` implementation
//! - [`stream`] — [`ContentRangeStream`], a chunked range-requesting `Read`
//! - [`download`] — [`DownloadHandle`], resumable download into a staging file

pub mod content_range;
pub mod download;
pub mod error;
pub mod http;
pub mod stream;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use download::{staging_path, DownloadHandle, DownloadResult, ProgressListener, Stopper};
pub use error::TransferError;
pub use http::{artifact_size, ByteRange, HttpConnector, HttpResponse, UreqConnector};
pub use stream::{ContentRangeStream, TransferState};
