//! Range-diff synchronization of one feedback channel.
//!
//! For every local store the server is asked which ids it already holds
//! (`GET {base}/{channel}/query?tid=..&logid=..`, answered with a compact
//! range string such as `1-30,40-45`). Everything between 1 and the local
//! high-water mark that the server lacks is read back from the store, and all
//! of it goes out in one streamed `POST {base}/{channel}/send` body, one JSON
//! record per line. The server de-duplicates by id, so a record may be sent
//! more than once but is never skipped.

use std::io::{self, Read};
use std::sync::Arc;

use outpost_core::{ChannelName, RangeSet};
use outpost_eventlog::{LogRecord, LogStoreManager};
use outpost_transfer::HttpConnector;

use crate::error::SyncError;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// What one [`FeedbackChannel::sync`] call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub stores_checked: usize,
    /// Stores whose query failed; they are retried next cycle.
    pub stores_skipped: usize,
    pub records_sent: usize,
}

pub struct FeedbackChannel {
    base_url: String,
    target_id: String,
    connector: Arc<dyn HttpConnector>,
    store: Arc<LogStoreManager>,
}

impl FeedbackChannel {
    pub fn new(
        base_url: impl Into<String>,
        target_id: impl Into<String>,
        connector: Arc<dyn HttpConnector>,
        store: Arc<LogStoreManager>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            target_id: target_id.into(),
            connector,
            store,
        }
    }

    pub fn name(&self) -> &ChannelName {
        self.store.channel()
    }

    pub fn query_url(&self, store_id: i64) -> String {
        format!(
            "{}/{}/query?tid={}&logid={}",
            self.base_url,
            self.name(),
            self.target_id,
            store_id
        )
    }

    pub fn send_url(&self) -> String {
        format!("{}/{}/send", self.base_url, self.name())
    }

    /// Ids the server already holds for `store_id`.
    pub fn query_remote(&self, store_id: i64) -> Result<RangeSet, SyncError> {
        let url = self.query_url(store_id);
        let body = self
            .connector
            .get(&url, None)?
            .error_for_status(&url)?
            .into_string(&url)?;
        Ok(body.trim().parse()?)
    }

    /// Local records of `store_id` that the server does not list in `remote`.
    pub fn missing_records(
        &self,
        store_id: i64,
        remote: &RangeSet,
    ) -> Result<Vec<LogRecord>, SyncError> {
        let highest = self.store.highest_event_id(store_id)?;
        if highest < 1 {
            return Ok(Vec::new());
        }
        let local = RangeSet::from_range(1, highest as u64);
        let missing = remote.difference_from(&local);
        let (Some(low), Some(high)) = (missing.min(), missing.max()) else {
            return Ok(Vec::new());
        };

        let events = self
            .store
            .get_events(store_id, low as i64, (high as i64).min(highest))?;
        Ok(select_missing(events, &missing))
    }

    /// Ship every record the server lacks, across all local stores.
    ///
    /// A store whose query fails is skipped. A back-off request from the
    /// server, during query or upload, aborts the channel and is returned.
    pub fn sync(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        let mut outgoing = Vec::new();

        for store_id in self.store.store_ids()? {
            report.stores_checked += 1;
            let remote = match self.query_remote(store_id) {
                Ok(remote) => remote,
                Err(err) if err.retry_after().is_some() => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        "channel {}: query for store {store_id} failed, skipping: {err}",
                        self.name()
                    );
                    report.stores_skipped += 1;
                    continue;
                }
            };
            let records = self.missing_records(store_id, &remote)?;
            tracing::debug!(
                "channel {}: store {store_id} server has {} ids, sending {}",
                self.name(),
                remote.len(),
                records.len()
            );
            outgoing.extend(records);
        }

        if outgoing.is_empty() {
            return Ok(report);
        }

        let count = outgoing.len();
        let url = self.send_url();
        self.connector
            .post(&url, NDJSON_CONTENT_TYPE, Box::new(NdjsonBody::new(outgoing)))?
            .error_for_status(&url)?;
        tracing::info!("channel {}: sent {count} records", self.name());
        report.records_sent = count;
        Ok(report)
    }
}

/// Keep the records whose id is in `missing`, walking both in id order.
///
/// Missing ids with no local record (lost to truncation or cleanup) are
/// passed over rather than stalling the walk.
fn select_missing(events: Vec<LogRecord>, missing: &RangeSet) -> Vec<LogRecord> {
    let mut wanted = missing.iter().peekable();
    let mut selected = Vec::new();
    for record in events {
        let Ok(id) = u64::try_from(record.id) else {
            continue;
        };
        while wanted.next_if(|next| *next < id).is_some() {}
        if wanted.next_if_eq(&id).is_some() {
            selected.push(record);
        }
        if wanted.peek().is_none() {
            break;
        }
    }
    selected
}

/// Request body that encodes records one line at a time as it is read.
struct NdjsonBody {
    records: std::vec::IntoIter<LogRecord>,
    line: Vec<u8>,
    pos: usize,
}

impl NdjsonBody {
    fn new(records: Vec<LogRecord>) -> Self {
        Self {
            records: records.into_iter(),
            line: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for NdjsonBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.line.len() {
            let Some(record) = self.records.next() else {
                return Ok(0);
            };
            self.line = record.to_line().map_err(io::Error::other)?;
            self.pos = 0;
        }
        let n = buf.len().min(self.line.len() - self.pos);
        buf[..n].copy_from_slice(&self.line[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
