//! In-memory [`HttpConnector`] for tests.
//!
//! Serves byte-range artifacts the way a well-behaved server does, plain
//! text bodies for version listings and feedback queries, and accepts
//! uploads. One-shot [`Scripted`] responses queued for a URL take precedence
//! over the registered route, which is how tests inject 503s, transport
//! failures and misbehaving servers.

use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Read};
use std::sync::Mutex;

use crate::content_range::ContentRange;
use crate::error::TransferError;
use crate::http::{ByteRange, HttpConnector, HttpResponse, SIZE_HEADER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub range: Option<ByteRange>,
    pub body: Option<Vec<u8>>,
}

/// A queued one-shot response.
#[derive(Debug, Clone)]
pub enum Scripted {
    Respond {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
    TransportError(String),
}

impl Scripted {
    pub fn respond(status: u16, headers: &[(&str, &str)], body: &[u8]) -> Self {
        Scripted::Respond {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.to_vec(),
        }
    }

    pub fn transport_error(message: &str) -> Self {
        Scripted::TransportError(message.to_string())
    }
}

#[derive(Debug, Clone)]
enum Route {
    Artifact(Vec<u8>),
    Text { status: u16, body: String },
    Upload,
}

#[derive(Default)]
struct State {
    routes: HashMap<String, Route>,
    scripted: HashMap<String, VecDeque<Scripted>>,
    requests: Vec<RecordedRequest>,
}

#[derive(Default)]
pub struct MemoryConnector {
    state: Mutex<State>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bytes` at `url`, honouring `Range` requests.
    pub fn serve_artifact(&self, url: &str, bytes: Vec<u8>) {
        self.lock().routes.insert(url.to_string(), Route::Artifact(bytes));
    }

    /// Serve a fixed text body with `status` at `url`.
    pub fn serve_text(&self, url: &str, status: u16, body: &str) {
        self.lock().routes.insert(
            url.to_string(),
            Route::Text {
                status,
                body: body.to_string(),
            },
        );
    }

    /// Accept POSTs at `url` with 200.
    pub fn accept_uploads(&self, url: &str) {
        self.lock().routes.insert(url.to_string(), Route::Upload);
    }

    pub fn remove(&self, url: &str) {
        self.lock().routes.remove(url);
    }

    /// Queue a one-shot response for the next request to `url`.
    pub fn script(&self, url: &str, response: Scripted) {
        self.lock()
            .scripted
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn requests_to(&self, url: &str) -> Vec<RecordedRequest> {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.url == url)
            .cloned()
            .collect()
    }

    /// Bodies of every POST to `url`, in order.
    pub fn uploads(&self, url: &str) -> Vec<String> {
        self.requests_to(url)
            .into_iter()
            .filter(|r| r.method == Method::Post)
            .filter_map(|r| r.body)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn dispatch(
        &self,
        method: Method,
        url: &str,
        range: Option<ByteRange>,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, TransferError> {
        let mut state = self.lock();
        state.requests.push(RecordedRequest {
            method,
            url: url.to_string(),
            range,
            body,
        });

        if let Some(scripted) = state.scripted.get_mut(url).and_then(VecDeque::pop_front) {
            return match scripted {
                Scripted::Respond {
                    status,
                    headers,
                    body,
                } => Ok(respond(status, headers, body)),
                Scripted::TransportError(message) => Err(TransferError::Transport {
                    url: url.to_string(),
                    message,
                }),
            };
        }

        match (state.routes.get(url), method) {
            (Some(Route::Artifact(bytes)), Method::Head) => Ok(respond(
                200,
                vec![(SIZE_HEADER.to_string(), bytes.len().to_string())],
                Vec::new(),
            )),
            (Some(Route::Artifact(bytes)), Method::Get) => Ok(serve_range(bytes, range)),
            (Some(Route::Text { status, body }), Method::Get) => {
                Ok(respond(*status, Vec::new(), body.clone().into_bytes()))
            }
            (Some(Route::Upload), Method::Post) => Ok(respond(200, Vec::new(), Vec::new())),
            _ => Ok(respond(404, Vec::new(), Vec::new())),
        }
    }
}

fn respond(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> HttpResponse {
    HttpResponse::new(status, headers, Box::new(Cursor::new(body)))
}

fn serve_range(bytes: &[u8], range: Option<ByteRange>) -> HttpResponse {
    let len = bytes.len() as u64;
    let Some(range) = range else {
        return respond(
            200,
            vec![("Content-Length".to_string(), len.to_string())],
            bytes.to_vec(),
        );
    };
    if range.start >= len {
        return respond(
            416,
            vec![("Content-Range".to_string(), format!("bytes */{len}"))],
            Vec::new(),
        );
    }
    let end = range.end.unwrap_or(len - 1).min(len - 1);
    let content_range = ContentRange {
        span: Some((range.start, end)),
        total: Some(len),
    };
    respond(
        206,
        vec![(
            "Content-Range".to_string(),
            format!("bytes {}-{}/{}", range.start, end, len),
        )],
        bytes[range.start as usize..(range.start + content_range.len()) as usize].to_vec(),
    )
}

impl HttpConnector for MemoryConnector {
    fn get(&self, url: &str, range: Option<ByteRange>) -> Result<HttpResponse, TransferError> {
        self.dispatch(Method::Get, url, range, None)
    }

    fn head(&self, url: &str) -> Result<HttpResponse, TransferError> {
        self.dispatch(Method::Head, url, None, None)
    }

    fn post(
        &self,
        url: &str,
        _content_type: &str,
        mut body: Box<dyn Read + Send>,
    ) -> Result<HttpResponse, TransferError> {
        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes)
            .map_err(|e| TransferError::from_io(url, e))?;
        self.dispatch(Method::Post, url, None, Some(bytes))
    }
}
