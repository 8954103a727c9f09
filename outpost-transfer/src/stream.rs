//! Chunked, range-requesting reader over a remote artifact.
//!
//! [`ContentRangeStream`] looks like an ordinary `Read`, but underneath it
//! fetches the artifact one `Range` request at a time. When a chunk is used
//! up the connection is dropped and the next `read` opens a new one at the
//! advanced offset, which bounds how long any single connection lives and
//! lets the caller stop between chunks.
//!
//! ## State machine
//!
//! ```text
//! Initial ──first read──▶ Open ──chunk exhausted──▶ Open (next chunk)
//!                           │
//!                           └──total reached / empty chunk──▶ EndOfContent
//! any state ──close()──▶ Closed
//! ```

use std::io::{self, Read};
use std::sync::Arc;

use crate::content_range::ContentRange;
use crate::error::TransferError;
use crate::http::{ByteRange, HttpConnector, HttpResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Initial,
    Open,
    EndOfContent,
    Closed,
}

pub struct ContentRangeStream {
    connector: Arc<dyn HttpConnector>,
    url: String,
    /// Bytes requested per chunk; `0` requests open-ended ranges.
    chunk_size: u64,
    state: TransferState,
    body: Option<Box<dyn Read + Send>>,
    /// Absolute offset of the next byte to deliver.
    offset: u64,
    chunk_read: u64,
    chunk_len: Option<u64>,
    total_read: u64,
    total: Option<u64>,
}

impl ContentRangeStream {
    /// A stream that starts delivering at `start_offset`.
    ///
    /// No request is made until the first `read`.
    pub fn open(
        connector: Arc<dyn HttpConnector>,
        url: impl Into<String>,
        start_offset: u64,
        chunk_size: u64,
    ) -> Self {
        Self {
            connector,
            url: url.into(),
            chunk_size,
            state: TransferState::Initial,
            body: None,
            offset: start_offset,
            chunk_read: 0,
            chunk_len: None,
            total_read: 0,
            total: None,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Absolute offset of the next byte.
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Bytes delivered by this stream (excluding `start_offset`).
    pub fn bytes_read(&self) -> u64 {
        self.total_read
    }

    /// Full artifact size once a response has told us.
    pub fn total_size(&self) -> Option<u64> {
        self.total
    }

    /// Bytes known to be left in the current chunk; `0` when unknown.
    pub fn available(&self) -> u64 {
        match (self.state, self.chunk_len) {
            (TransferState::Open, Some(len)) => len.saturating_sub(self.chunk_read),
            _ => 0,
        }
    }

    pub fn close(&mut self) {
        self.body = None;
        self.state = TransferState::Closed;
    }

    fn request_range(&self) -> ByteRange {
        if self.chunk_size == 0 {
            return ByteRange::from(self.offset);
        }
        let mut end = self.offset + self.chunk_size - 1;
        if let Some(total) = self.total {
            end = end.min(total.saturating_sub(1));
        }
        ByteRange::bounded(self.offset, end)
    }

    /// Fetch the next chunk, leaving the stream `Open` or at `EndOfContent`.
    fn open_chunk(&mut self) -> Result<(), TransferError> {
        self.body = None;
        if matches!(self.total, Some(total) if self.offset >= total) {
            self.state = TransferState::EndOfContent;
            return Ok(());
        }

        let range = self.request_range();
        let response = self.connector.get(&self.url, Some(range))?;
        match response.status {
            200 => self.accept_full(response),
            206 => self.accept_partial(response),
            416 => self.accept_unsatisfiable(&response),
            503 => Err(TransferError::RetryAfter {
                secs: response.retry_after_secs(),
            }),
            status => Err(TransferError::Protocol(format!(
                "unexpected status {status} for {} at offset {}",
                self.url, self.offset
            ))),
        }
    }

    fn accept_full(&mut self, response: HttpResponse) -> Result<(), TransferError> {
        if self.offset > 0 || self.total_read > 0 {
            return Err(TransferError::Protocol(format!(
                "server ignored range request for {} at offset {}",
                self.url, self.offset
            )));
        }
        let total = response.content_length().or(response.declared_size());
        self.update_total(total)?;
        self.chunk_len = total;
        self.chunk_read = 0;
        self.body = Some(response.into_reader());
        self.state = TransferState::Open;
        Ok(())
    }

    fn accept_partial(&mut self, response: HttpResponse) -> Result<(), TransferError> {
        let header = response.header("Content-Range").ok_or_else(|| {
            TransferError::Protocol(format!("206 without Content-Range from {}", self.url))
        })?;
        let content_range = ContentRange::parse(header)?;
        let Some((start, _)) = content_range.span else {
            return Err(TransferError::Protocol(format!(
                "206 with unsatisfied Content-Range from {}",
                self.url
            )));
        };
        if start != self.offset {
            return Err(TransferError::Protocol(format!(
                "requested offset {} but server sent {start}",
                self.offset
            )));
        }
        self.update_total(content_range.total.or(response.declared_size()))?;
        self.chunk_len = Some(content_range.len());
        self.chunk_read = 0;
        self.body = Some(response.into_reader());
        self.state = TransferState::Open;
        Ok(())
    }

    fn accept_unsatisfiable(&mut self, response: &HttpResponse) -> Result<(), TransferError> {
        let total = response
            .header("Content-Range")
            .map(ContentRange::parse)
            .transpose()?
            .and_then(|range| range.total);
        match total {
            Some(total) if self.offset >= total => {
                tracing::debug!(url = %self.url, total, "range not satisfiable, content already complete");
                self.update_total(Some(total))?;
                self.state = TransferState::EndOfContent;
                Ok(())
            }
            _ => Err(TransferError::Protocol(format!(
                "range not satisfiable for {} at offset {}",
                self.url, self.offset
            ))),
        }
    }

    fn update_total(&mut self, reported: Option<u64>) -> Result<(), TransferError> {
        match (self.total, reported) {
            (Some(known), Some(new)) if known != new => Err(TransferError::Protocol(format!(
                "content size changed from {known} to {new} for {}",
                self.url
            ))),
            (None, Some(new)) => {
                self.total = Some(new);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// The current body ended; decide between next chunk and end of content.
    fn finish_chunk(&mut self) -> Result<(), TransferError> {
        if let Some(len) = self.chunk_len {
            if self.chunk_read < len {
                return Err(TransferError::Protocol(format!(
                    "connection closed after {} of {len} bytes for {}",
                    self.chunk_read, self.url
                )));
            }
        }
        self.body = None;

        // With no total to go by, a chunk shorter than requested is the last.
        let short_chunk = self.total.is_none()
            && self.chunk_size > 0
            && matches!(self.chunk_len, Some(len) if len < self.chunk_size);
        if short_chunk {
            self.total = Some(self.offset);
        }

        let reached_total = matches!(self.total, Some(total) if self.offset >= total);
        let open_ended = self.chunk_len.is_none();
        if reached_total || open_ended || self.chunk_read == 0 {
            self.state = TransferState::EndOfContent;
            return Ok(());
        }
        self.open_chunk()
    }
}

impl Read for ContentRangeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.state {
                TransferState::Closed => {
                    return Err(TransferError::Protocol("read on closed stream".to_string()).into_io())
                }
                TransferState::EndOfContent => return Ok(0),
                TransferState::Initial => self.open_chunk().map_err(TransferError::into_io)?,
                TransferState::Open => {
                    let remaining = self.chunk_len.map(|len| len - self.chunk_read);
                    if remaining == Some(0) {
                        self.finish_chunk().map_err(TransferError::into_io)?;
                        continue;
                    }
                    let limit = remaining
                        .map(|r| r.min(buf.len() as u64) as usize)
                        .unwrap_or(buf.len());
                    let Some(body) = self.body.as_mut() else {
                        self.finish_chunk().map_err(TransferError::into_io)?;
                        continue;
                    };
                    let n = body.read(&mut buf[..limit])?;
                    if n == 0 {
                        self.finish_chunk().map_err(TransferError::into_io)?;
                        continue;
                    }
                    self.chunk_read += n as u64;
                    self.total_read += n as u64;
                    self.offset += n as u64;
                    return Ok(n);
                }
            }
        }
    }
}

impl std::fmt::Debug for ContentRangeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentRangeStream")
            .field("url", &self.url)
            .field("state", &self.state)
            .field("offset", &self.offset)
            .field("chunk_read", &self.chunk_read)
            .field("chunk_len", &self.chunk_len)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}
