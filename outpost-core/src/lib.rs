//! Outpost core library — domain types, id ranges, agent configuration.
//!
//! Public API surface:
//! - [`types`] — [`Version`], [`UpdateInfo`], newtypes
//! - [`range`] — [`RangeSet`] and its compact textual form
//! - [`config`] — [`AgentConfig`] snapshots and the [`ConfigStore`]
//! - [`paths`] — on-disk layout under `~/.outpost/`
//! - [`error`] — [`ConfigError`], [`ParseError`]

pub mod config;
pub mod error;
pub mod paths;
pub mod range;
pub mod types;

pub use config::{AgentConfig, ConfigStore};
pub use error::{ConfigError, ParseError};
pub use range::RangeSet;
pub use types::{ChannelName, TargetKind, UpdateInfo, Version};
