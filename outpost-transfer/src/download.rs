//! Resumable download into a staging file.
//!
//! ## Transfer protocol
//!
//! 1. Measure the staging file; its length is the resume offset.
//! 2. If non-empty, `HEAD` the artifact: equal size means already complete,
//!    a larger staging file is stale and is truncated.
//! 3. Open a [`ContentRangeStream`] at the offset and append to the file.
//! 4. Check the stop flags before every read; flush before returning.
//! 5. Verify the final length against the announced total.
//!
//! The staging file is the only checkpoint: a stopped or failed transfer
//! leaves it in place and the next `start()` picks up where it ended.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use sha2::{Digest, Sha256};

use crate::error::{io_err, TransferError};
use crate::http::{artifact_size, HttpConnector};
use crate::stream::ContentRangeStream;

const COPY_BUFFER: usize = 8 * 1024;

/// Callback receiving `(bytes in staging file, total size if known)`.
pub type ProgressListener = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Terminal outcome of one transfer attempt.
#[derive(Debug)]
pub enum DownloadResult {
    /// The staging file holds the complete artifact.
    Successful(PathBuf),
    /// Stopped on request; `bytes` are kept for the next attempt.
    Stopped { bytes: u64 },
    Failed(TransferError),
}

impl DownloadResult {
    pub fn is_successful(&self) -> bool {
        matches!(self, DownloadResult::Successful(_))
    }
}

/// Deterministic staging path for `url` under `dir`.
pub fn staging_path(dir: &Path, url: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    dir.join(format!("{}.part", hex::encode(hasher.finalize())))
}

/// Cloneable handle that requests a cooperative stop.
#[derive(Debug, Clone)]
pub struct Stopper(Arc<AtomicBool>);

impl Stopper {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct DownloadHandle {
    connector: Arc<dyn HttpConnector>,
    url: String,
    staging: PathBuf,
    chunk_size: u64,
    listener: Option<ProgressListener>,
    stop: Arc<AtomicBool>,
    cancel: Option<Arc<AtomicBool>>,
    worker: Option<JoinHandle<DownloadResult>>,
}

impl DownloadHandle {
    pub fn new(
        connector: Arc<dyn HttpConnector>,
        url: impl Into<String>,
        staging: impl Into<PathBuf>,
    ) -> Self {
        Self {
            connector,
            url: url.into(),
            staging: staging.into(),
            chunk_size: 0,
            listener: None,
            stop: Arc::new(AtomicBool::new(false)),
            cancel: None,
            worker: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_listener(mut self, listener: ProgressListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Also stop when this externally owned flag is raised (agent shutdown).
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    pub fn stopper(&self) -> Stopper {
        Stopper(self.stop.clone())
    }

    pub fn is_active(&self) -> bool {
        self.worker
            .as_ref()
            .map(|worker| !worker.is_finished())
            .unwrap_or(false)
    }

    /// Begin (or resume) the transfer on a worker thread.
    pub fn start(&mut self) -> Result<(), TransferError> {
        if self.is_active() {
            return Err(TransferError::AlreadyStarted);
        }
        if let Some(previous) = self.worker.take() {
            // Finished but never collected.
            let _ = previous.join();
        }
        self.stop.store(false, Ordering::SeqCst);

        let job = TransferJob {
            connector: self.connector.clone(),
            url: self.url.clone(),
            staging: self.staging.clone(),
            chunk_size: self.chunk_size,
            listener: self.listener.clone(),
            stop: self.stop.clone(),
            cancel: self.cancel.clone(),
        };
        let worker = thread::Builder::new()
            .name("outpost-download".to_string())
            .spawn(move || job.run())
            .map_err(|e| io_err(&self.staging, e))?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Block until the current transfer ends.
    pub fn wait(&mut self) -> Result<DownloadResult, TransferError> {
        let worker = self.worker.take().ok_or(TransferError::NotStarted)?;
        Ok(worker.join().unwrap_or_else(|_| {
            DownloadResult::Failed(TransferError::Protocol("download worker panicked".to_string()))
        }))
    }

    /// `start()` followed by `wait()`.
    pub fn run(&mut self) -> Result<DownloadResult, TransferError> {
        self.start()?;
        self.wait()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stop any transfer and delete the staging file.
    pub fn discard(&mut self) -> Result<(), TransferError> {
        self.stop();
        if self.worker.is_some() {
            let _ = self.wait()?;
        }
        match fs::remove_file(&self.staging) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&self.staging, err)),
        }
    }
}

impl std::fmt::Debug for DownloadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadHandle")
            .field("url", &self.url)
            .field("staging", &self.staging)
            .field("chunk_size", &self.chunk_size)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

struct TransferJob {
    connector: Arc<dyn HttpConnector>,
    url: String,
    staging: PathBuf,
    chunk_size: u64,
    listener: Option<ProgressListener>,
    stop: Arc<AtomicBool>,
    cancel: Option<Arc<AtomicBool>>,
}

impl TransferJob {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
            || self
                .cancel
                .as_ref()
                .map(|c| c.load(Ordering::SeqCst))
                .unwrap_or(false)
    }

    fn run(self) -> DownloadResult {
        match self.transfer() {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(url = %self.url, error = %err, "download failed");
                DownloadResult::Failed(err)
            }
        }
    }

    fn transfer(&self) -> Result<DownloadResult, TransferError> {
        if let Some(parent) = self.staging.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }

        let mut offset = match fs::metadata(&self.staging) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => 0,
            Err(err) => return Err(io_err(&self.staging, err)),
        };

        if offset > 0 {
            match artifact_size(self.connector.as_ref(), &self.url)? {
                Some(size) if size == offset => {
                    tracing::info!(url = %self.url, size, "staging file already complete");
                    return Ok(DownloadResult::Successful(self.staging.clone()));
                }
                Some(size) if offset > size => {
                    tracing::warn!(url = %self.url, size, staged = offset, "staging file larger than artifact, restarting");
                    offset = 0;
                }
                _ => {
                    tracing::info!(url = %self.url, offset, "resuming download");
                }
            }
        }

        let file = self.open_staging(offset == 0)?;
        let mut writer = BufWriter::new(file);
        let mut stream = ContentRangeStream::open(
            self.connector.clone(),
            self.url.clone(),
            offset,
            self.chunk_size,
        );
        let mut buf = vec![0u8; COPY_BUFFER];
        let mut written = offset;

        loop {
            if self.stopped() {
                self.flush(&mut writer)?;
                tracing::info!(url = %self.url, bytes = written, "download stopped");
                return Ok(DownloadResult::Stopped { bytes: written });
            }
            let n = match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.flush(&mut writer)?;
                    return Err(TransferError::from_io(&self.url, err));
                }
            };
            if let Err(err) = writer.write_all(&buf[..n]) {
                let _ = writer.flush();
                return Err(io_err(&self.staging, err));
            }
            written += n as u64;
            if let Some(listener) = &self.listener {
                listener(written, stream.total_size());
            }
        }
        self.flush(&mut writer)?;

        if let Some(total) = stream.total_size() {
            if written != total {
                return Err(TransferError::Protocol(format!(
                    "downloaded {written} bytes but {} announced {total}",
                    self.url
                )));
            }
        }
        tracing::info!(url = %self.url, bytes = written, "download complete");
        Ok(DownloadResult::Successful(self.staging.clone()))
    }

    fn open_staging(&self, fresh: bool) -> Result<File, TransferError> {
        let mut options = OpenOptions::new();
        options.create(true);
        if fresh {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        options
            .open(&self.staging)
            .map_err(|e| io_err(&self.staging, e))
    }

    fn flush(&self, writer: &mut BufWriter<File>) -> Result<(), TransferError> {
        writer.flush().map_err(|e| io_err(&self.staging, e))
    }
}
