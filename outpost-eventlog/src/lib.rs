//! # outpost-eventlog
//!
//! Append-only, size-bounded feedback channels.
//!
//! - [`store`] — [`FeedbackStore`], one shared [`LogStoreManager`] per channel
//! - [`manager`] — writes, range reads, rotation and cleanup for one channel
//! - [`record`] — [`LogRecord`] and the well-known [`event_types`]
//! - `file` — frame encoding and corruption-tolerant scanning

mod file;

pub mod error;
pub mod manager;
pub mod record;
pub mod store;

pub use error::LogStoreError;
pub use manager::LogStoreManager;
pub use record::{event_types, LogRecord};
pub use store::FeedbackStore;
