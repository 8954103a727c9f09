//! Shared fixtures: an in-memory server, scripted installables and a
//! temporary agent home.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io::Read;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use outpost_core::{paths, AgentConfig, ChannelName, ConfigStore, UpdateInfo, Version};
use outpost_daemon::{
    AgentContext, DaemonError, EventPublisher, Installable, RecordingPublisher, UpdateController,
};
use outpost_eventlog::FeedbackStore;
use outpost_transfer::testing::MemoryConnector;
use tempfile::TempDir;

pub const BASE: &str = "http://server";
pub const AGENT_VERSIONS: &str = "http://server/agent/dev1/outpost.agent/versions/";
pub const DEPLOYMENT_VERSIONS: &str = "http://server/deployment/dev1/versions/";

pub fn config() -> AgentConfig {
    AgentConfig {
        server_url: BASE.to_string(),
        identification: "dev1".to_string(),
        agent_symbolic_name: "outpost.agent".to_string(),
        feedback_channels: vec![ChannelName::from("auditlog")],
        chunk_size: 4096,
        ..AgentConfig::default()
    }
}

/// Installable whose outcome is controlled by the test.
#[derive(Default)]
pub struct ScriptedInstallable {
    installed: Mutex<Version>,
    failing: Mutex<HashSet<Version>>,
    attempts: Mutex<Vec<(Version, Vec<u8>)>>,
}

impl ScriptedInstallable {
    pub fn with_installed(version: Version) -> Self {
        let installable = Self::default();
        *installable.installed.lock().unwrap() = version;
        installable
    }

    pub fn fail(&self, version: Version) {
        self.failing.lock().unwrap().insert(version);
    }

    pub fn heal(&self, version: &Version) {
        self.failing.lock().unwrap().remove(version);
    }

    pub fn attempts(&self) -> Vec<(Version, Vec<u8>)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn installed(&self) -> Version {
        self.installed.lock().unwrap().clone()
    }
}

impl Installable for ScriptedInstallable {
    fn installed_version(&self) -> Result<Version, DaemonError> {
        Ok(self.installed())
    }

    fn install(&self, info: &UpdateInfo, content: &mut dyn Read) -> Result<(), DaemonError> {
        let mut bytes = Vec::new();
        let read = content.read_to_end(&mut bytes);
        self.attempts.lock().unwrap().push((info.to.clone(), bytes));
        read.map_err(|e| DaemonError::Install(format!("read failed: {e}")))?;

        if self.failing.lock().unwrap().contains(&info.to) {
            return Err(DaemonError::Install(format!("{} rejected", info.to)));
        }
        *self.installed.lock().unwrap() = info.to.clone();
        Ok(())
    }
}

pub struct Harness {
    pub home: TempDir,
    pub config: Arc<ConfigStore>,
    pub connector: Arc<MemoryConnector>,
    pub feedback: Arc<FeedbackStore>,
    pub events: Arc<RecordingPublisher>,
    pub agent: Arc<ScriptedInstallable>,
    pub deployment: Arc<ScriptedInstallable>,
}

impl Harness {
    pub fn new(config: AgentConfig) -> Self {
        let home = TempDir::new().expect("home");
        let feedback = Arc::new(FeedbackStore::new(
            paths::feedback_dir(home.path()),
            config.identification.clone(),
            config.max_log_file_size,
        ));
        let connector = Arc::new(MemoryConnector::new());
        // Nothing offered for self-update unless a test says otherwise.
        connector.serve_text(AGENT_VERSIONS, 200, "");
        connector.serve_text(DEPLOYMENT_VERSIONS, 200, "");
        Self {
            config: Arc::new(ConfigStore::new(config)),
            connector,
            feedback,
            events: Arc::new(RecordingPublisher::default()),
            agent: Arc::new(ScriptedInstallable::default()),
            deployment: Arc::new(ScriptedInstallable::default()),
            home,
        }
    }

    pub fn context(&self) -> AgentContext {
        self.context_with(self.events.clone())
    }

    pub fn context_with(&self, events: Arc<dyn EventPublisher>) -> AgentContext {
        AgentContext {
            config: self.config.clone(),
            connector: self.connector.clone(),
            feedback: self.feedback.clone(),
            events,
            agent_installable: self.agent.clone(),
            deployment_installable: self.deployment.clone(),
            downloads_dir: self.downloads_dir(),
        }
    }

    pub fn controller(&self) -> UpdateController {
        UpdateController::new(self.context(), Arc::new(AtomicBool::new(false)))
    }

    pub fn downloads_dir(&self) -> std::path::PathBuf {
        paths::downloads_dir(self.home.path())
    }

    /// Offer `versions` for the deployment target, each with `artifact(v)`
    /// as its content.
    pub fn offer_deployment(&self, versions: &[Version]) {
        let listing: Vec<String> = versions.iter().map(ToString::to_string).collect();
        self.connector
            .serve_text(DEPLOYMENT_VERSIONS, 200, &listing.join("\n"));
        for version in versions {
            self.connector
                .serve_artifact(&format!("{DEPLOYMENT_VERSIONS}{version}"), artifact(version));
        }
    }

    pub fn content_requests(&self, version: &Version) -> usize {
        self.connector
            .requests_to(&format!("{DEPLOYMENT_VERSIONS}{version}"))
            .len()
    }
}

/// Deterministic 10,000-byte artifact body for `version`.
pub fn artifact(version: &Version) -> Vec<u8> {
    let seed = version.to_string().into_bytes();
    (0..10_000u32)
        .map(|i| seed[i as usize % seed.len()].wrapping_add((i / 7) as u8))
        .collect()
}
