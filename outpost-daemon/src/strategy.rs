//! How an artifact travels from the server into an [`Installable`].
//!
//! [`Installable`]: crate::target::Installable

use std::any::Any;
use std::fs::File;
use std::io::{self, Read};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use outpost_core::{AgentConfig, UpdateInfo};
use outpost_transfer::{
    staging_path, ContentRangeStream, DownloadHandle, DownloadResult, HttpConnector,
    TransferError,
};

use crate::error::{io_err, DaemonError};
use crate::target::UpdateTarget;

/// Shared inputs of one fetch-and-install.
pub struct FetchContext<'a> {
    pub connector: Arc<dyn HttpConnector>,
    pub config: &'a AgentConfig,
    pub cancel: Arc<AtomicBool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStrategy {
    /// Feed the response body straight into the installer; nothing is kept.
    Streaming,
    /// Download into a resumable staging file under `staging_dir`, then
    /// install from it.
    DownloadThenInstall { staging_dir: PathBuf },
}

impl InstallStrategy {
    pub fn from_config(config: &AgentConfig, staging_dir: &Path) -> Self {
        if config.streaming {
            InstallStrategy::Streaming
        } else {
            InstallStrategy::DownloadThenInstall {
                staging_dir: staging_dir.to_path_buf(),
            }
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, InstallStrategy::Streaming)
    }

    pub fn fetch_and_install(
        &self,
        ctx: &FetchContext<'_>,
        target: &UpdateTarget,
        info: &UpdateInfo,
        url: &str,
    ) -> Result<(), DaemonError> {
        match self {
            InstallStrategy::Streaming => stream_install(ctx, target, info, url),
            InstallStrategy::DownloadThenInstall { staging_dir } => {
                download_install(ctx, target, info, url, staging_dir)
            }
        }
    }
}

fn stream_install(
    ctx: &FetchContext<'_>,
    target: &UpdateTarget,
    info: &UpdateInfo,
    url: &str,
) -> Result<(), DaemonError> {
    let stream = ContentRangeStream::open(
        ctx.connector.clone(),
        url.to_string(),
        0,
        ctx.config.chunk_size,
    );
    let mut reader = GuardedReader::new(stream, ctx.cancel.clone(), url);
    let result = install_from(target, info, &mut reader);
    match reader.interruption() {
        // The installer only saw an opaque read error; report what it was.
        Some(cause) if result.is_err() => Err(cause),
        _ => result,
    }
}

fn download_install(
    ctx: &FetchContext<'_>,
    target: &UpdateTarget,
    info: &UpdateInfo,
    url: &str,
    staging_dir: &Path,
) -> Result<(), DaemonError> {
    let mut handle = DownloadHandle::new(
        ctx.connector.clone(),
        url,
        staging_path(staging_dir, url),
    )
    .with_chunk_size(ctx.config.chunk_size)
    .with_cancel_flag(ctx.cancel.clone());

    let path = match handle.run()? {
        DownloadResult::Successful(path) => path,
        DownloadResult::Stopped { bytes } => {
            tracing::info!(url, bytes, "download stopped; staging file kept");
            return Err(DaemonError::Stopped);
        }
        DownloadResult::Failed(err) => return Err(err.into()),
    };

    let result = File::open(&path)
        .map_err(|e| io_err(&path, e))
        .and_then(|mut file| install_from(target, info, &mut file));
    // Installed or not, this artifact is never resumed again.
    if let Err(err) = handle.discard() {
        tracing::warn!(url, error = %err, "could not remove staging file");
    }
    result
}

/// Hand `content` to the target's installer. A panicking installer is an
/// install failure like any other.
fn install_from(
    target: &UpdateTarget,
    info: &UpdateInfo,
    content: &mut dyn Read,
) -> Result<(), DaemonError> {
    panic::catch_unwind(AssertUnwindSafe(|| target.installable().install(info, content)))
        .unwrap_or_else(|payload| {
            Err(DaemonError::Install(format!(
                "installer panicked: {}",
                panic_message(payload.as_ref())
            )))
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Read adapter for streaming installs: honours the cancel flag and
/// remembers back-off or stop so they are not lost inside the installer's
/// own error type.
struct GuardedReader<R> {
    inner: R,
    cancel: Arc<AtomicBool>,
    url: String,
    retry_after: Option<u64>,
    stopped: bool,
}

impl<R: Read> GuardedReader<R> {
    fn new(inner: R, cancel: Arc<AtomicBool>, url: &str) -> Self {
        Self {
            inner,
            cancel,
            url: url.to_string(),
            retry_after: None,
            stopped: false,
        }
    }

    fn interruption(&self) -> Option<DaemonError> {
        if self.stopped {
            return Some(DaemonError::Stopped);
        }
        self.retry_after
            .map(|secs| TransferError::RetryAfter { secs }.into())
    }
}

impl<R: Read> Read for GuardedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.load(Ordering::SeqCst) {
            self.stopped = true;
            return Err(io::Error::other("install stopped"));
        }
        self.inner.read(buf).map_err(|err| {
            let kind = err.kind();
            let transfer = TransferError::from_io(&self.url, err);
            self.retry_after = transfer.retry_after();
            io::Error::new(kind, transfer)
        })
    }
}
