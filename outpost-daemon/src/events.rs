//! Agent event bus.
//!
//! Installers publish through the [`EventPublisher`] trait; the runtime backs
//! it with a tokio broadcast channel that the audit subscriber listens on.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;

use outpost_core::{AgentConfig, ConfigStore, UpdateInfo};

/// Broadcast capacity; slow subscribers see `Lagged` beyond this.
pub const EVENT_BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    InstallationStarted {
        info: UpdateInfo,
    },
    InstallationCompleted {
        info: UpdateInfo,
        success: bool,
        cause: Option<String>,
    },
    ConfigurationChanged {
        config: AgentConfig,
    },
}

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: AgentEvent);
}

/// Broadcast-backed publisher shared by every component of one agent.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }

    /// Publish `ConfigurationChanged` whenever `store` takes a new snapshot.
    pub fn watch_config(&self, store: &ConfigStore) {
        let bus = self.clone();
        store.on_change(move |config| {
            bus.publish(AgentEvent::ConfigurationChanged {
                config: config.clone(),
            });
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: AgentEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

/// Publisher that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<AgentEvent>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<AgentEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: AgentEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use outpost_core::{TargetKind, Version};

    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let info = UpdateInfo::new(
            TargetKind::Deployment,
            Version::EMPTY,
            Version::new(1, 0, 0),
            false,
        );
        bus.publish(AgentEvent::InstallationStarted { info: info.clone() });
        assert_eq!(
            rx.recv().await.expect("event"),
            AgentEvent::InstallationStarted { info }
        );
    }

    #[tokio::test]
    async fn config_replacement_is_published() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let store = ConfigStore::new(AgentConfig::default());
        bus.watch_config(&store);

        let changed = AgentConfig {
            streaming: true,
            ..AgentConfig::default()
        };
        assert!(store.replace(changed.clone()));
        match rx.recv().await.expect("event") {
            AgentEvent::ConfigurationChanged { config } => assert_eq!(config, changed),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let info = UpdateInfo::new(
            TargetKind::Agent,
            Version::new(1, 0, 0),
            Version::new(1, 1, 0),
            true,
        );
        let json = serde_json::to_string(&AgentEvent::InstallationCompleted {
            info,
            success: false,
            cause: Some("disk full".to_string()),
        })
        .unwrap();
        assert!(json.contains("\"event\":\"installation_completed\""), "{json}");
        assert!(json.contains("\"to\":\"1.1.0\""), "{json}");
    }
}
