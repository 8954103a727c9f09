//! Sync entrypoint shared by the daemon loop and `outpost once`.

use std::sync::Arc;

use outpost_core::{AgentConfig, ChannelName};
use outpost_eventlog::FeedbackStore;
use outpost_transfer::HttpConnector;

use crate::channel::{FeedbackChannel, SyncReport};
use crate::error::SyncError;

/// One [`FeedbackChannel`] per configured channel name.
///
/// A channel whose log cannot be opened is logged and left out, so the
/// others still sync.
pub fn channels_for(
    config: &AgentConfig,
    store: &FeedbackStore,
    connector: Arc<dyn HttpConnector>,
) -> Vec<FeedbackChannel> {
    config
        .feedback_channels
        .iter()
        .filter_map(|name| match store.channel(name) {
            Ok(log) => Some(FeedbackChannel::new(
                config.base_url(),
                config.identification.clone(),
                Arc::clone(&connector),
                log,
            )),
            Err(err) => {
                tracing::error!("channel {name}: cannot open log, skipped: {err}");
                None
            }
        })
        .collect()
}

/// Sync every channel in order.
///
/// A channel that fails is logged and left for the next cycle; a back-off
/// request from the server stops the whole flush and is returned.
pub fn flush_all(
    channels: &[FeedbackChannel],
) -> Result<Vec<(ChannelName, SyncReport)>, SyncError> {
    let mut reports = Vec::with_capacity(channels.len());
    for channel in channels {
        match channel.sync() {
            Ok(report) => reports.push((channel.name().clone(), report)),
            Err(err) if err.retry_after().is_some() => return Err(err),
            Err(err) => {
                tracing::error!("channel {}: sync failed: {err}", channel.name());
            }
        }
    }
    Ok(reports)
}
