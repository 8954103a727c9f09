//! On-disk framing for store files.
//!
//! A store file is a flat sequence of frames:
//!
//! ```text
//! [id: i64 big-endian][len: i32 big-endian][payload: len bytes of JSON]
//! ```
//!
//! Frames are appended as a single buffer so a reader never observes a
//! header without its payload unless the process died mid-write. A scan
//! stops at the first frame that cannot be read and reports the offset of
//! the last intact frame, which is where the file gets truncated.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{io_err, LogStoreError};
use crate::record::LogRecord;

/// Size of `[id][len]`.
pub(crate) const HEADER_LEN: u64 = 12;

/// Parsed `{channel}-{store_id}.{sequence}` file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoreFileName {
    pub store_id: i64,
    pub sequence: u32,
    pub path: PathBuf,
}

impl StoreFileName {
    pub fn new(dir: &Path, channel: &str, store_id: i64, sequence: u32) -> Self {
        Self {
            store_id,
            sequence,
            path: dir.join(format!("{channel}-{store_id}.{sequence}")),
        }
    }

    /// Parse a directory entry; `None` for files that belong to another
    /// channel or do not follow the naming scheme.
    pub fn parse(dir: &Path, channel: &str, file_name: &str) -> Option<Self> {
        let rest = file_name.strip_prefix(channel)?.strip_prefix('-')?;
        let (store, seq) = rest.split_once('.')?;
        if store.is_empty() || !store.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let store_id = store.parse().ok()?;
        let sequence = seq.parse().ok()?;
        Some(Self::new(dir, channel, store_id, sequence))
    }
}

/// All store files of `channel` under `dir`, ordered by store id then
/// sequence. A missing directory yields an empty list.
pub(crate) fn list_store_files(
    dir: &Path,
    channel: &str,
) -> Result<Vec<StoreFileName>, LogStoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_err(dir, err)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let name = entry.file_name();
        if let Some(parsed) = name.to_str().and_then(|n| StoreFileName::parse(dir, channel, n)) {
            files.push(parsed);
        }
    }
    files.sort_by_key(|f| (f.store_id, f.sequence));
    Ok(files)
}

/// Encode one record as a complete frame.
pub(crate) fn encode_frame(record: &LogRecord) -> Result<Vec<u8>, LogStoreError> {
    let payload = serde_json::to_vec(record)?;
    let len = i32::try_from(payload.len())
        .map_err(|_| LogStoreError::RecordTooLarge { size: payload.len() })?;

    let mut frame = Vec::with_capacity(HEADER_LEN as usize + payload.len());
    frame.extend_from_slice(&record.id.to_be_bytes());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// The file currently accepting appends.
#[derive(Debug)]
pub(crate) struct StoreFile {
    name: StoreFileName,
    file: File,
    /// End of the last complete frame.
    len: u64,
}

impl StoreFile {
    /// Open (or create) the file, positioned after its existing frames.
    pub fn open(name: StoreFileName) -> Result<Self, LogStoreError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&name.path)
            .map_err(|e| io_err(&name.path, e))?;
        let len = file.metadata().map_err(|e| io_err(&name.path, e))?.len();
        Ok(Self { name, file, len })
    }

    pub fn name(&self) -> &StoreFileName {
        &self.name
    }

    pub fn store_id(&self) -> i64 {
        self.name.store_id
    }

    pub fn path(&self) -> &Path {
        &self.name.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    /// Write a pre-encoded frame. On failure the committed length is left
    /// untouched so the partial write can be cut off with [`Self::truncate_to`].
    pub fn append(&mut self, frame: &[u8]) -> Result<(), LogStoreError> {
        self.file
            .seek(SeekFrom::Start(self.len))
            .and_then(|_| self.file.write_all(frame))
            .and_then(|_| self.file.flush())
            .map_err(|e| io_err(&self.name.path, e))?;
        self.len += frame.len() as u64;
        Ok(())
    }

    /// Cut the file back to `len` bytes.
    pub fn truncate_to(&mut self, len: u64) -> Result<(), LogStoreError> {
        self.file
            .set_len(len)
            .map_err(|e| io_err(&self.name.path, e))?;
        self.len = len;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Sequential frame reader over one store file.
pub(crate) struct FrameReader {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    file_len: u64,
}

/// A frame header plus, when requested, its decoded record.
pub(crate) struct Frame {
    pub id: i64,
    pub record: Option<LogRecord>,
}

impl FrameReader {
    pub fn open(path: &Path) -> Result<Self, LogStoreError> {
        let file = File::open(path).map_err(|e| io_err(path, e))?;
        let file_len = file.metadata().map_err(|e| io_err(path, e))?.len();
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            offset: 0,
            file_len,
        })
    }

    /// Offset just past the last frame returned.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next frame. `decode` selects whether the payload is parsed
    /// or skipped. `Ok(None)` at a clean end of file.
    pub fn next_frame(&mut self, decode: bool) -> Result<Option<Frame>, LogStoreError> {
        let remaining = self.file_len - self.offset;
        if remaining == 0 {
            return Ok(None);
        }
        if remaining < HEADER_LEN {
            return Err(self.corrupt("truncated frame header"));
        }

        let mut header = [0u8; HEADER_LEN as usize];
        self.reader
            .read_exact(&mut header)
            .map_err(|e| io_err(&self.path, e))?;
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&header[..8]);
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&header[8..]);
        let id = i64::from_be_bytes(id_bytes);
        let len = i32::from_be_bytes(len_bytes);

        if id <= 0 {
            return Err(self.corrupt(format!("invalid record id {id}")));
        }
        let Ok(len) = u64::try_from(len) else {
            return Err(self.corrupt(format!("negative payload length {len}")));
        };
        if len > remaining - HEADER_LEN {
            return Err(self.corrupt("payload extends past end of file"));
        }

        let record = if decode {
            let mut payload = vec![0u8; len as usize];
            self.reader
                .read_exact(&mut payload)
                .map_err(|e| io_err(&self.path, e))?;
            match serde_json::from_slice::<LogRecord>(&payload) {
                Ok(record) if record.id == id => Some(record),
                Ok(record) => {
                    return Err(self.corrupt(format!(
                        "header id {id} does not match payload id {}",
                        record.id
                    )))
                }
                Err(err) => return Err(self.corrupt(format!("unreadable payload: {err}"))),
            }
        } else {
            self.reader
                .seek_relative(len as i64)
                .map_err(|e| io_err(&self.path, e))?;
            None
        };

        self.offset += HEADER_LEN + len;
        Ok(Some(Frame { id, record }))
    }

    fn corrupt(&self, reason: impl Into<String>) -> LogStoreError {
        LogStoreError::Corrupt {
            path: self.path.clone(),
            offset: self.offset,
            reason: reason.into(),
        }
    }
}

/// Cut a closed store file back to `len` bytes.
pub(crate) fn truncate_file(path: &Path, len: u64) -> Result<(), LogStoreError> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    file.set_len(len).map_err(|e| io_err(path, e))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    fn record(id: i64) -> LogRecord {
        LogRecord {
            target_id: "dev1".to_string(),
            store_id: 5,
            id,
            time: Utc::now(),
            event_type: 1,
            properties: BTreeMap::new(),
        }
    }

    fn write_records(dir: &TempDir, ids: &[i64]) -> StoreFile {
        let mut file = StoreFile::open(StoreFileName::new(dir.path(), "auditlog", 5, 1))
            .expect("open");
        for id in ids {
            file.append(&encode_frame(&record(*id)).unwrap()).expect("append");
        }
        file
    }

    fn read_all(path: &Path) -> (Vec<i64>, Option<u64>) {
        let mut reader = FrameReader::open(path).expect("reader");
        let mut ids = Vec::new();
        loop {
            match reader.next_frame(true) {
                Ok(Some(frame)) => ids.push(frame.record.unwrap().id),
                Ok(None) => return (ids, None),
                Err(LogStoreError::Corrupt { offset, .. }) => return (ids, Some(offset)),
                Err(other) => panic!("unexpected: {other}"),
            }
        }
    }

    #[rstest]
    #[case("auditlog-1700000000000.3", Some((1_700_000_000_000, 3)))]
    #[case("auditlog-12.0", Some((12, 0)))]
    #[case("auditlog-12", None)]
    #[case("auditlog-x.1", None)]
    #[case("auditlog--5.1", None)]
    #[case("other-12.1", None)]
    #[case("auditlog-extra-12.1", None)]
    fn file_names_parse(#[case] name: &str, #[case] expected: Option<(i64, u32)>) {
        let parsed = StoreFileName::parse(Path::new("/tmp"), "auditlog", name)
            .map(|n| (n.store_id, n.sequence));
        assert_eq!(parsed, expected);
    }

    #[test]
    fn listing_orders_by_store_then_sequence() {
        let dir = TempDir::new().expect("dir");
        for name in ["auditlog-20.2", "auditlog-10.1", "auditlog-20.1", "metrics-1.1", "notes.txt"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let listed: Vec<_> = list_store_files(dir.path(), "auditlog")
            .unwrap()
            .into_iter()
            .map(|f| (f.store_id, f.sequence))
            .collect();
        assert_eq!(listed, vec![(10, 1), (20, 1), (20, 2)]);
    }

    #[test]
    fn frames_read_back_in_order() {
        let dir = TempDir::new().expect("dir");
        let file = write_records(&dir, &[1, 2, 3]);
        assert_eq!(read_all(file.path()), (vec![1, 2, 3], None));
    }

    #[test]
    fn skipping_payloads_still_yields_ids() {
        let dir = TempDir::new().expect("dir");
        let file = write_records(&dir, &[1, 2]);
        let mut reader = FrameReader::open(file.path()).unwrap();
        let first = reader.next_frame(false).unwrap().unwrap();
        assert_eq!((first.id, first.record.is_none()), (1, true));
        assert_eq!(reader.next_frame(false).unwrap().unwrap().id, 2);
        assert!(reader.next_frame(false).unwrap().is_none());
        assert_eq!(reader.offset(), file.len());
    }

    #[test]
    fn torn_tail_reports_last_good_offset() {
        let dir = TempDir::new().expect("dir");
        let mut file = write_records(&dir, &[1, 2]);
        let good = file.len();
        let frame = encode_frame(&record(3)).unwrap();
        file.append(&frame[..frame.len() / 2]).unwrap();

        assert_eq!(read_all(file.path()), (vec![1, 2], Some(good)));
    }

    #[test]
    fn garbage_payload_is_corruption() {
        let dir = TempDir::new().expect("dir");
        let mut file = write_records(&dir, &[1]);
        let good = file.len();
        let mut bogus = Vec::new();
        bogus.extend_from_slice(&2i64.to_be_bytes());
        bogus.extend_from_slice(&4i32.to_be_bytes());
        bogus.extend_from_slice(b"nope");
        file.append(&bogus).unwrap();

        assert_eq!(read_all(file.path()), (vec![1], Some(good)));
    }

    #[test]
    fn truncation_restores_readability() {
        let dir = TempDir::new().expect("dir");
        let mut file = write_records(&dir, &[1, 2]);
        let good = file.len();
        file.append(b"\x00\x00\x00").unwrap();
        file.truncate_to(good).unwrap();
        file.append(&encode_frame(&record(3)).unwrap()).unwrap();

        assert_eq!(read_all(file.path()), (vec![1, 2, 3], None));
    }
}
