//! # outpost-sync
//!
//! Ships locally recorded feedback to the server.
//!
//! Call [`FeedbackChannel::sync`] for a single channel, or
//! [`pipeline::flush_all`] to process every configured channel.

pub mod channel;
pub mod error;
pub mod pipeline;

pub use channel::{FeedbackChannel, SyncReport, NDJSON_CONTENT_TYPE};
pub use error::SyncError;
pub use pipeline::{channels_for, flush_all};
