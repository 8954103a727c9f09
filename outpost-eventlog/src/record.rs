//! Feedback records and their encodings.
//!
//! A record is stored on disk as the JSON payload of a frame (see
//! [`crate::file`]) and shipped to the server as one JSON object per line.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known record type codes.
pub mod event_types {
    pub const INSTALLATION_STARTED: i32 = 4001;
    pub const INSTALLATION_COMPLETED: i32 = 4002;
    pub const CONFIGURATION_CHANGED: i32 = 4003;
    pub const AGENT_STARTED: i32 = 1001;
    pub const AGENT_STOPPED: i32 = 1002;
}

/// One immutable entry in a feedback channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Device that produced the record.
    pub target_id: String,
    pub store_id: i64,
    /// Sequential within `store_id`, starting at 1.
    pub id: i64,
    pub time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: i32,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl LogRecord {
    /// Single-line JSON form used on the wire, terminated by `\n`.
    pub fn to_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end())
    }
}
