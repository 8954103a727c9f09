//! The seam to the host network layer.
//!
//! Everything in outpost that talks HTTP goes through [`HttpConnector`], so
//! the transfer, sync and update logic can be driven by an in-memory server
//! in tests. [`UreqConnector`] is the production implementation.

use std::fmt;
use std::io::Read;
use std::time::Duration;

use outpost_core::AgentConfig;

use crate::error::{TransferError, DEFAULT_RETRY_AFTER_SECS};

/// Header carrying the full artifact size on `HEAD` and ranged responses.
pub const SIZE_HEADER: &str = "X-Package-Size";

/// A `Range: bytes=start-[end]` request, `end` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn from(start: u64) -> Self {
        Self { start, end: None }
    }

    pub fn bounded(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// A response with its body still unread.
pub struct HttpResponse {
    pub status: u16,
    headers: Vec<(String, String)>,
    body: Box<dyn Read + Send>,
}

impl HttpResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Box<dyn Read + Send>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Full artifact size from [`SIZE_HEADER`], if the server sent one.
    pub fn declared_size(&self) -> Option<u64> {
        self.header(SIZE_HEADER).and_then(|v| v.trim().parse().ok())
    }

    /// Seconds from `Retry-After`, defaulting to 30 when absent or not a
    /// plain number of seconds.
    pub fn retry_after_secs(&self) -> u64 {
        self.header("Retry-After")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Map 503 to a back-off and any other non-2xx status to a protocol error.
    pub fn error_for_status(self, url: &str) -> Result<Self, TransferError> {
        match self.status {
            503 => Err(TransferError::RetryAfter {
                secs: self.retry_after_secs(),
            }),
            _ if self.is_success() => Ok(self),
            status => Err(TransferError::Protocol(format!(
                "unexpected status {status} from {url}"
            ))),
        }
    }

    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.body
    }

    pub fn into_string(mut self, url: &str) -> Result<String, TransferError> {
        let mut text = String::new();
        self.body
            .read_to_string(&mut text)
            .map_err(|e| TransferError::from_io(url, e))?;
        Ok(text)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Blocking HTTP client operations the agent needs.
///
/// Implementations return `Ok` for every HTTP status, including 4xx/5xx;
/// only connectivity failures are `Err`.
pub trait HttpConnector: Send + Sync {
    fn get(&self, url: &str, range: Option<ByteRange>) -> Result<HttpResponse, TransferError>;

    fn head(&self, url: &str) -> Result<HttpResponse, TransferError>;

    /// POST `body` without a known length (chunked transfer encoding).
    fn post(
        &self,
        url: &str,
        content_type: &str,
        body: Box<dyn Read + Send>,
    ) -> Result<HttpResponse, TransferError>;
}

/// `HEAD url` and read the artifact size; `None` when the server does not say.
///
/// Servers that reject `HEAD` (405 and friends) just leave the size unknown.
/// Only a 503 back-off or a transport failure is an error.
pub fn artifact_size(
    connector: &dyn HttpConnector,
    url: &str,
) -> Result<Option<u64>, TransferError> {
    let response = connector.head(url)?;
    match response.status {
        503 => Err(TransferError::RetryAfter {
            secs: response.retry_after_secs(),
        }),
        _ if response.is_success() => Ok(response.declared_size()),
        status => {
            tracing::debug!(url, status, "HEAD rejected; artifact size unknown");
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// ureq implementation
// ---------------------------------------------------------------------------

/// Production connector backed by a shared `ureq::Agent`.
#[derive(Clone)]
pub struct UreqConnector {
    agent: ureq::Agent,
}

impl UreqConnector {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_read(read_timeout)
            .build();
        Self { agent }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.read_timeout_secs),
        )
    }

    fn finish(
        url: &str,
        result: Result<ureq::Response, ureq::Error>,
    ) -> Result<HttpResponse, TransferError> {
        match result {
            Ok(response) | Err(ureq::Error::Status(_, response)) => Ok(convert(response)),
            Err(ureq::Error::Transport(transport)) => Err(TransferError::Transport {
                url: url.to_string(),
                message: transport.to_string(),
            }),
        }
    }
}

impl fmt::Debug for UreqConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UreqConnector").finish_non_exhaustive()
    }
}

fn convert(response: ureq::Response) -> HttpResponse {
    let status = response.status();
    let headers = response
        .headers_names()
        .into_iter()
        .filter_map(|name| {
            let value = response.header(&name)?.to_string();
            Some((name, value))
        })
        .collect();
    HttpResponse::new(status, headers, Box::new(response.into_reader()))
}

impl HttpConnector for UreqConnector {
    fn get(&self, url: &str, range: Option<ByteRange>) -> Result<HttpResponse, TransferError> {
        let mut request = self.agent.get(url);
        if let Some(range) = range {
            request = request.set("Range", &range.header_value());
        }
        tracing::debug!(url, range = ?range, "GET");
        Self::finish(url, request.call())
    }

    fn head(&self, url: &str) -> Result<HttpResponse, TransferError> {
        tracing::debug!(url, "HEAD");
        Self::finish(url, self.agent.head(url).call())
    }

    fn post(
        &self,
        url: &str,
        content_type: &str,
        body: Box<dyn Read + Send>,
    ) -> Result<HttpResponse, TransferError> {
        tracing::debug!(url, content_type, "POST");
        let request = self.agent.post(url).set("Content-Type", content_type);
        Self::finish(url, request.send(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn response(status: u16, headers: &[(&str, &str)]) -> HttpResponse {
        HttpResponse::new(
            status,
            headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            Box::new(Cursor::new(Vec::new())),
        )
    }

    #[test]
    fn range_header_values() {
        assert_eq!(ByteRange::from(10).header_value(), "bytes=10-");
        assert_eq!(ByteRange::bounded(0, 99).header_value(), "bytes=0-99");
    }

    #[test]
    fn header_lookup_ignores_case() {
        let r = response(200, &[("content-length", "12"), ("x-package-size", "99")]);
        assert_eq!(r.content_length(), Some(12));
        assert_eq!(r.declared_size(), Some(99));
    }

    #[test]
    fn retry_after_defaults_to_thirty_seconds() {
        assert_eq!(response(503, &[]).retry_after_secs(), 30);
        assert_eq!(response(503, &[("Retry-After", "soon")]).retry_after_secs(), 30);
        assert_eq!(response(503, &[("Retry-After", " 45 ")]).retry_after_secs(), 45);
    }

    #[test]
    fn error_for_status_maps_backoff_and_failures() {
        let err = response(503, &[("Retry-After", "12")])
            .error_for_status("http://x")
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(12));

        let err = response(404, &[]).error_for_status("http://x").unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)), "got: {err}");

        assert!(response(204, &[]).error_for_status("http://x").is_ok());
    }

    #[test]
    fn rejected_head_leaves_size_unknown() {
        use crate::testing::{MemoryConnector, Scripted};

        let server = MemoryConnector::new();
        server.script("http://x", Scripted::respond(405, &[], b""));
        assert_eq!(artifact_size(&server, "http://x").unwrap(), None);

        server.script("http://x", Scripted::respond(200, &[(SIZE_HEADER, "640")], b""));
        assert_eq!(artifact_size(&server, "http://x").unwrap(), Some(640));

        server.script("http://x", Scripted::respond(503, &[("Retry-After", "9")], b""));
        let err = artifact_size(&server, "http://x").unwrap_err();
        assert_eq!(err.retry_after(), Some(9));
    }
}
