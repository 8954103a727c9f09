//! Audit subscriber: persists agent events into the `auditlog` channel so
//! they reach the server with the next feedback sync.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use outpost_core::ChannelName;
use outpost_eventlog::{event_types, LogRecord, LogStoreError, LogStoreManager};

use crate::error::DaemonError;
use crate::events::AgentEvent;

pub const AUDIT_CHANNEL: &str = "auditlog";

pub fn audit_channel() -> ChannelName {
    ChannelName::from(AUDIT_CHANNEL)
}

/// Record type and properties for `event`.
pub fn audit_entry(event: &AgentEvent) -> (i32, Vec<(String, String)>) {
    match event {
        AgentEvent::InstallationStarted { info } => (
            event_types::INSTALLATION_STARTED,
            vec![
                ("target".to_string(), info.target.to_string()),
                ("from".to_string(), info.from.to_string()),
                ("version".to_string(), info.to.to_string()),
                ("fix_package".to_string(), info.fix_package.to_string()),
            ],
        ),
        AgentEvent::InstallationCompleted {
            info,
            success,
            cause,
        } => {
            let mut properties = vec![
                ("target".to_string(), info.target.to_string()),
                ("version".to_string(), info.to.to_string()),
                ("success".to_string(), success.to_string()),
            ];
            if let Some(cause) = cause {
                properties.push(("cause".to_string(), cause.clone()));
            }
            (event_types::INSTALLATION_COMPLETED, properties)
        }
        AgentEvent::ConfigurationChanged { config } => (
            event_types::CONFIGURATION_CHANGED,
            vec![
                ("server_url".to_string(), config.server_url.clone()),
                ("streaming".to_string(), config.streaming.to_string()),
                ("max_retries".to_string(), config.max_retries.to_string()),
            ],
        ),
    }
}

pub fn record_event(
    channel: &LogStoreManager,
    event: &AgentEvent,
) -> Result<LogRecord, LogStoreError> {
    let (event_type, properties) = audit_entry(event);
    channel.write(event_type, properties)
}

/// Append every bus event to `channel` until shutdown. Events already queued
/// at shutdown are still written.
pub async fn audit_task(
    mut events: broadcast::Receiver<AgentEvent>,
    channel: Arc<LogStoreManager>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            received = events.recv() => match received {
                Ok(event) => persist(&channel, event).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "audit subscriber lagged; events dropped");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }

    loop {
        match events.try_recv() {
            Ok(event) => persist(&channel, event).await,
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "audit subscriber lagged; events dropped");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    Ok(())
}

async fn persist(channel: &Arc<LogStoreManager>, event: AgentEvent) {
    let channel = Arc::clone(channel);
    let written = tokio::task::spawn_blocking(move || record_event(&channel, &event)).await;
    match written {
        Ok(Ok(record)) => {
            tracing::debug!(id = record.id, event_type = record.event_type, "audit record written");
        }
        Ok(Err(err)) => tracing::warn!(error = %err, "audit record not written"),
        Err(err) => tracing::warn!(error = %err, "audit writer task failed"),
    }
}

#[cfg(test)]
mod tests {
    use outpost_core::{TargetKind, UpdateInfo, Version};
    use outpost_eventlog::FeedbackStore;
    use tempfile::TempDir;

    use super::*;
    use crate::events::{EventBus, EventPublisher};

    fn info() -> UpdateInfo {
        UpdateInfo::new(
            TargetKind::Deployment,
            Version::new(1, 0, 0),
            Version::new(2, 0, 0),
            false,
        )
    }

    #[test]
    fn completion_records_carry_the_cause() {
        let (event_type, properties) = audit_entry(&AgentEvent::InstallationCompleted {
            info: info(),
            success: false,
            cause: Some("checksum mismatch".to_string()),
        });
        assert_eq!(event_type, event_types::INSTALLATION_COMPLETED);
        assert!(properties.contains(&("success".to_string(), "false".to_string())));
        assert!(properties.contains(&("cause".to_string(), "checksum mismatch".to_string())));
    }

    #[tokio::test]
    async fn bus_events_land_in_the_audit_channel() {
        let dir = TempDir::new().expect("dir");
        let store = FeedbackStore::new(dir.path(), "dev1", 1_000_000);
        let channel = store.channel(&audit_channel()).expect("channel");
        let bus = EventBus::new();
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let task = tokio::spawn(audit_task(
            bus.subscribe(),
            Arc::clone(&channel),
            shutdown_tx.subscribe(),
        ));

        bus.publish(AgentEvent::InstallationStarted { info: info() });
        bus.publish(AgentEvent::InstallationCompleted {
            info: info(),
            success: true,
            cause: None,
        });
        tokio::task::yield_now().await;
        let _ = shutdown_tx.send(());
        task.await.expect("join").expect("audit task");

        let store_id = channel.current_store_id().expect("store id");
        let records = channel.get_events(store_id, 1, 10).expect("read");
        let types: Vec<i32> = records.iter().map(|r| r.event_type).collect();
        assert_eq!(
            types,
            vec![
                event_types::INSTALLATION_STARTED,
                event_types::INSTALLATION_COMPLETED
            ]
        );
        assert_eq!(records[0].properties.get("version").map(String::as_str), Some("2.0.0"));
    }
}
