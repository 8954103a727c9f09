//! Per-channel store manager: appends, rotation, cleanup and range reads.
//!
//! Files for a channel live in one directory as `{channel}-{store_id}.{seq}`.
//! Exactly one file (the newest) accepts writes. It is rotated to a new
//! sequence number once it reaches a tenth of the channel's size budget, and
//! the oldest files are deleted whenever the channel as a whole reaches the
//! budget.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use outpost_core::ChannelName;

use crate::error::{io_err, LogStoreError};
use crate::file::{
    encode_frame, list_store_files, truncate_file, FrameReader, StoreFile, StoreFileName,
};
use crate::record::LogRecord;

/// Files rotate once they reach `max_file_size / ROTATION_DIVISOR` bytes.
pub const ROTATION_DIVISOR: u64 = 10;

/// Owns every file of one feedback channel.
#[derive(Debug)]
pub struct LogStoreManager {
    channel: ChannelName,
    dir: PathBuf,
    target_id: String,
    max_file_size: u64,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    current: Option<StoreFile>,
    /// Highest id per store, filled lazily by a cold scan.
    highest: HashMap<i64, i64>,
    /// Bytes across all files of the channel.
    total_size: u64,
}

impl LogStoreManager {
    /// Open the channel under `dir`, resuming the newest existing file.
    ///
    /// A torn frame at the tail of that file (left by a crash mid-write) is
    /// cut off before any new record is appended.
    pub(crate) fn open(
        dir: &Path,
        channel: ChannelName,
        target_id: impl Into<String>,
        max_file_size: u64,
    ) -> Result<Self, LogStoreError> {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let files = list_store_files(dir, &channel.0)?;
        let mut total_size = 0;
        for file in &files {
            total_size += file_len(&file.path)?;
        }

        let manager = Self {
            channel,
            dir: dir.to_path_buf(),
            target_id: target_id.into(),
            max_file_size,
            inner: Mutex::new(Inner {
                total_size,
                ..Inner::default()
            }),
        };

        if let Some(newest) = files.last() {
            let mut inner = manager.lock();
            let mut current = StoreFile::open(newest.clone())?;
            let good = scan_end(current.path())?;
            if good < current.len() {
                tracing::warn!(
                    channel = %manager.channel,
                    path = %current.path().display(),
                    offset = good,
                    "truncating torn tail of store file"
                );
                inner.total_size -= current.len() - good;
                current.truncate_to(good)?;
            }
            inner.current = Some(current);
        }

        tracing::debug!(
            channel = %manager.channel,
            files = files.len(),
            "opened feedback channel"
        );
        Ok(manager)
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append a record with the next id of the active store.
    pub fn write(
        &self,
        event_type: i32,
        properties: impl IntoIterator<Item = (String, String)>,
    ) -> Result<LogRecord, LogStoreError> {
        let mut inner = self.lock();

        if inner.current.is_none() {
            self.start_store(&mut inner)?;
        }
        self.cleanup_if_needed(&mut inner)?;
        if self.should_rotate(&inner) {
            self.next_file(&mut inner)?;
        }

        let store_id = self.current(&inner)?.store_id();
        let id = self.highest_locked(&mut inner, store_id)? + 1;
        let record = LogRecord {
            target_id: self.target_id.clone(),
            store_id,
            id,
            time: Utc::now(),
            event_type,
            properties: properties.into_iter().collect(),
        };
        let frame = encode_frame(&record)?;

        let current = self.current_mut(&mut inner)?;
        let committed = current.len();
        match current.append(&frame) {
            Ok(()) => {
                inner.total_size += frame.len() as u64;
                inner.highest.insert(store_id, id);
                Ok(record)
            }
            Err(err) => {
                tracing::error!(
                    channel = %self.channel,
                    store_id,
                    error = %err,
                    "append failed; abandoning store file"
                );
                self.abandon_current(&mut inner, committed);
                Err(err)
            }
        }
    }

    /// Records of `store_id` with `from <= id <= to`, in id order.
    ///
    /// A file that turns out to be unreadable part way through is truncated
    /// at its last intact frame; the records before that point are still
    /// returned.
    pub fn get_events(
        &self,
        store_id: i64,
        from: i64,
        to: i64,
    ) -> Result<Vec<LogRecord>, LogStoreError> {
        let mut inner = self.lock();
        let mut events = Vec::new();
        if from > to {
            return Ok(events);
        }

        let files = self.files_of(store_id)?;
        'files: for file in files {
            let mut reader = FrameReader::open(&file.path)?;
            loop {
                match reader.next_frame(true) {
                    Ok(Some(frame)) => {
                        if frame.id > to {
                            break 'files;
                        }
                        if frame.id >= from {
                            if let Some(record) = frame.record {
                                events.push(record);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(LogStoreError::Corrupt { offset, reason, .. }) => {
                        self.repair(&mut inner, &file, offset, &reason)?;
                        break;
                    }
                    Err(other) => return Err(other),
                }
            }
        }
        Ok(events)
    }

    /// Highest id written to `store_id`, or 0 for an empty store.
    pub fn highest_event_id(&self, store_id: i64) -> Result<i64, LogStoreError> {
        let mut inner = self.lock();
        self.highest_locked(&mut inner, store_id)
    }

    /// Every store id that still has a file on disk, ascending.
    pub fn store_ids(&self) -> Result<Vec<i64>, LogStoreError> {
        let inner = self.lock();
        let mut ids: BTreeSet<i64> = list_store_files(&self.dir, &self.channel.0)?
            .into_iter()
            .map(|f| f.store_id)
            .collect();
        if let Some(current) = &inner.current {
            ids.insert(current.store_id());
        }
        Ok(ids.into_iter().collect())
    }

    /// Store id receiving writes, if any record or rotation happened yet.
    pub fn current_store_id(&self) -> Option<i64> {
        self.lock().current.as_ref().map(StoreFile::store_id)
    }

    /// Start a new store; subsequent records are numbered from 1 again.
    pub fn rotate(&self) -> Result<i64, LogStoreError> {
        let mut inner = self.lock();
        self.cleanup_if_needed(&mut inner)?;
        self.start_store(&mut inner)
    }

    /// Bytes on disk across all files of the channel.
    pub fn total_size(&self) -> u64 {
        self.lock().total_size
    }

    // -----------------------------------------------------------------------
    // Internals (caller holds the lock)
    // -----------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn current<'a>(&self, inner: &'a Inner) -> Result<&'a StoreFile, LogStoreError> {
        inner.current.as_ref().ok_or_else(|| self.no_current())
    }

    fn current_mut<'a>(&self, inner: &'a mut Inner) -> Result<&'a mut StoreFile, LogStoreError> {
        inner.current.as_mut().ok_or_else(|| self.no_current())
    }

    fn no_current(&self) -> LogStoreError {
        io_err(
            &self.dir,
            std::io::Error::other(format!("channel {} has no writable store", self.channel)),
        )
    }

    fn files_of(&self, store_id: i64) -> Result<Vec<StoreFileName>, LogStoreError> {
        Ok(list_store_files(&self.dir, &self.channel.0)?
            .into_iter()
            .filter(|f| f.store_id == store_id)
            .collect())
    }

    fn rotation_threshold(&self) -> u64 {
        (self.max_file_size / ROTATION_DIVISOR).max(1)
    }

    fn should_rotate(&self, inner: &Inner) -> bool {
        inner
            .current
            .as_ref()
            .is_some_and(|c| c.len() >= self.rotation_threshold())
    }

    fn highest_locked(&self, inner: &mut Inner, store_id: i64) -> Result<i64, LogStoreError> {
        if let Some(id) = inner.highest.get(&store_id) {
            return Ok(*id);
        }

        let mut highest = 0;
        for file in self.files_of(store_id)? {
            let mut reader = FrameReader::open(&file.path)?;
            loop {
                match reader.next_frame(false) {
                    Ok(Some(frame)) => highest = highest.max(frame.id),
                    Ok(None) => break,
                    Err(LogStoreError::Corrupt { offset, reason, .. }) => {
                        self.repair(inner, &file, offset, &reason)?;
                        break;
                    }
                    Err(other) => return Err(other),
                }
            }
        }
        inner.highest.insert(store_id, highest);
        Ok(highest)
    }

    /// Open a fresh store id strictly above every id seen so far.
    fn start_store(&self, inner: &mut Inner) -> Result<i64, LogStoreError> {
        let newest = list_store_files(&self.dir, &self.channel.0)?
            .last()
            .map(|f| f.store_id)
            .into_iter()
            .chain(inner.current.as_ref().map(StoreFile::store_id))
            .max();
        let now = Utc::now().timestamp_millis();
        let store_id = match newest {
            Some(id) if id >= now => id + 1,
            _ => now,
        };

        let file = StoreFile::open(StoreFileName::new(&self.dir, &self.channel.0, store_id, 1))?;
        tracing::info!(channel = %self.channel, store_id, "started new store");
        inner.current = Some(file);
        inner.highest.insert(store_id, 0);
        Ok(store_id)
    }

    /// Continue the active store in its next sequence file.
    fn next_file(&self, inner: &mut Inner) -> Result<(), LogStoreError> {
        let name = self.current(inner)?.name().clone();
        let next = StoreFileName::new(&self.dir, &self.channel.0, name.store_id, name.sequence + 1);
        tracing::debug!(
            channel = %self.channel,
            path = %next.path.display(),
            "rotating store file"
        );
        inner.current = Some(StoreFile::open(next)?);
        Ok(())
    }

    /// Delete the oldest files until the channel is back under 90% of its
    /// budget. The active file is never deleted.
    fn cleanup_if_needed(&self, inner: &mut Inner) -> Result<(), LogStoreError> {
        if inner.total_size < self.max_file_size {
            return Ok(());
        }
        let target = self.max_file_size / 10 * 9;
        let current = inner.current.as_ref().map(|c| c.path().to_path_buf());

        for file in list_store_files(&self.dir, &self.channel.0)? {
            if inner.total_size <= target {
                break;
            }
            if current.as_deref() == Some(file.path.as_path()) {
                continue;
            }
            let len = file_len(&file.path)?;
            fs::remove_file(&file.path).map_err(|e| io_err(&file.path, e))?;
            inner.total_size = inner.total_size.saturating_sub(len);
            tracing::info!(
                channel = %self.channel,
                path = %file.path.display(),
                bytes = len,
                "deleted old store file"
            );
        }
        Ok(())
    }

    /// Truncate `file` at `offset` after a read found it unreadable there.
    /// If it is the active file, writes move on to a fresh sequence file.
    fn repair(
        &self,
        inner: &mut Inner,
        file: &StoreFileName,
        offset: u64,
        reason: &str,
    ) -> Result<(), LogStoreError> {
        tracing::warn!(
            channel = %self.channel,
            path = %file.path.display(),
            offset,
            reason,
            "store file corrupt; truncating"
        );
        let before = file_len(&file.path)?;

        let is_current = inner
            .current
            .as_ref()
            .is_some_and(|c| c.path() == file.path);
        if is_current {
            self.current_mut(inner)?.truncate_to(offset)?;
            self.next_file(inner)?;
        } else {
            truncate_file(&file.path, offset)?;
        }
        inner.total_size = inner.total_size.saturating_sub(before.saturating_sub(offset));
        Ok(())
    }

    /// After a failed append: cut the partial frame and move writes to a
    /// fresh file of the same store.
    fn abandon_current(&self, inner: &mut Inner, committed: u64) {
        if let Some(current) = inner.current.as_mut() {
            if let Err(err) = current.truncate_to(committed) {
                tracing::warn!(channel = %self.channel, error = %err, "could not truncate store file");
            }
        }
        if let Err(err) = self.next_file(inner) {
            tracing::warn!(channel = %self.channel, error = %err, "could not open fresh store file");
            inner.current = None;
        }
    }
}

/// Offset of the end of the last intact frame in `path`.
fn scan_end(path: &Path) -> Result<u64, LogStoreError> {
    let mut reader = FrameReader::open(path)?;
    loop {
        match reader.next_frame(false) {
            Ok(Some(_)) => {}
            Ok(None) => return Ok(reader.offset()),
            Err(LogStoreError::Corrupt { offset, .. }) => return Ok(offset),
            Err(other) => return Err(other),
        }
    }
}

fn file_len(path: &Path) -> Result<u64, LogStoreError> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| io_err(path, e))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
