//! Agent configuration persisted at `~/.outpost/config.yaml`.
//!
//! # API pattern
//!
//! Every function touching disk has two forms:
//! - `fn_at(home: &Path, …)` — explicit home; used in tests with `TempDir`
//! - `fn(…)` — derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! At runtime the configuration is held by a [`ConfigStore`] as an immutable
//! `Arc<AgentConfig>` snapshot. Consumers call [`ConfigStore::snapshot`] at
//! the start of an operation and never observe a half-applied change.

use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::paths;
use crate::types::ChannelName;

/// Default per-channel cap on feedback storage, in bytes.
pub const DEFAULT_MAX_LOG_FILE_SIZE: u64 = 1_000_000;

/// Default chunk size for ranged downloads, in bytes.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Everything the controller, the transfer layer and the feedback sync read
/// at the start of a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the management server, without trailing slash.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// This device's identification as known to the server.
    #[serde(default = "default_identification")]
    pub identification: String,
    /// Symbolic name under which the agent binary is published.
    #[serde(default = "default_agent_symbolic_name")]
    pub agent_symbolic_name: String,
    /// Install while streaming instead of download-then-install.
    #[serde(default)]
    pub streaming: bool,
    /// Request fix packages relative to the installed version.
    #[serde(default)]
    pub fix_package: bool,
    #[serde(default = "default_sync_delay_secs")]
    pub sync_delay_secs: u64,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Install attempts per version before backing off until a newer one appears.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_feedback_channels")]
    pub feedback_channels: Vec<ChannelName>,
    /// Bytes requested per ranged GET; `0` requests open-ended ranges.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Aggregate on-disk cap per feedback channel.
    #[serde(default = "default_max_log_file_size")]
    pub max_log_file_size: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

fn default_server_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_identification() -> String {
    "outpost".to_string()
}

fn default_agent_symbolic_name() -> String {
    "outpost.agent".to_string()
}

fn default_sync_delay_secs() -> u64 {
    5
}

fn default_sync_interval_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    1
}

fn default_feedback_channels() -> Vec<ChannelName> {
    vec![ChannelName::from("auditlog")]
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_log_file_size() -> u64 {
    DEFAULT_MAX_LOG_FILE_SIZE
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_read_timeout_secs() -> u64 {
    30
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            identification: default_identification(),
            agent_symbolic_name: default_agent_symbolic_name(),
            streaming: false,
            fix_package: false,
            sync_delay_secs: default_sync_delay_secs(),
            sync_interval_secs: default_sync_interval_secs(),
            max_retries: default_max_retries(),
            feedback_channels: default_feedback_channels(),
            chunk_size: default_chunk_size(),
            max_log_file_size: default_max_log_file_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
        }
    }
}

impl AgentConfig {
    /// `server_url` with any trailing slashes removed.
    pub fn base_url(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load `<home>/.outpost/config.yaml`.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<AgentConfig, ConfigError> {
    let path = paths::config_path(home);
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<AgentConfig, ConfigError> {
    load_at(&home()?)
}

/// Load the config, falling back to defaults when the file does not exist.
pub fn load_or_default_at(home: &Path) -> Result<AgentConfig, ConfigError> {
    match load_at(home) {
        Err(ConfigError::ConfigNotFound { .. }) => Ok(AgentConfig::default()),
        other => other,
    }
}

/// Atomically save the config to `<home>/.outpost/config.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &AgentConfig) -> Result<(), ConfigError> {
    let root = paths::outpost_root(home);
    if !root.exists() {
        std::fs::create_dir_all(&root)?;
        set_dir_permissions(&root)?;
    }
    let path = paths::config_path(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &AgentConfig) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

fn home() -> Result<std::path::PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// ConfigStore
// ---------------------------------------------------------------------------

type ChangeListener = Box<dyn Fn(&AgentConfig) + Send + Sync>;

/// Holder of the current configuration snapshot.
///
/// Readers clone the `Arc`; [`ConfigStore::replace`] swaps it and notifies
/// listeners after the swap.
pub struct ConfigStore {
    current: RwLock<Arc<AgentConfig>>,
    listeners: RwLock<Vec<ChangeListener>>,
}

impl ConfigStore {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// The latest snapshot.
    pub fn snapshot(&self) -> Arc<AgentConfig> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Swap in a new snapshot. Listeners run only when the value changed.
    pub fn replace(&self, config: AgentConfig) -> bool {
        let next = Arc::new(config);
        {
            let mut guard = match self.current.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if **guard == *next {
                return false;
            }
            *guard = next.clone();
        }
        let listeners = match self.listeners.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for listener in listeners.iter() {
            listener(&next);
        }
        true
    }

    /// Register a callback for configuration changes.
    pub fn on_change(&self, listener: impl Fn(&AgentConfig) + Send + Sync + 'static) {
        let mut guard = match self.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(Box::new(listener));
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(AgentConfig::default())
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("current", &self.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn missing_fields_take_defaults() {
        let config: AgentConfig =
            serde_yaml::from_str("server_url: http://mgmt:9000\nstreaming: true\n").unwrap();
        assert_eq!(config.server_url, "http://mgmt:9000");
        assert!(config.streaming);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.feedback_channels, vec![ChannelName::from("auditlog")]);
    }

    #[test]
    fn base_url_strips_trailing_slash() {
        let config = AgentConfig {
            server_url: "http://mgmt/".to_string(),
            ..AgentConfig::default()
        };
        assert_eq!(config.base_url(), "http://mgmt");
    }

    #[test]
    fn load_or_default_when_file_missing() {
        let home = TempDir::new().unwrap();
        let config = load_or_default_at(home.path()).unwrap();
        assert_eq!(config, AgentConfig::default());
    }

    #[test]
    fn snapshot_survives_replace() {
        let store = ConfigStore::default();
        let before = store.snapshot();
        assert!(store.replace(AgentConfig {
            streaming: true,
            ..AgentConfig::default()
        }));
        assert!(!before.streaming, "old snapshot must stay immutable");
        assert!(store.snapshot().streaming);
    }

    #[test]
    fn listeners_fire_only_on_real_change() {
        let store = ConfigStore::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        store.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!store.replace(AgentConfig::default()));
        assert!(store.replace(AgentConfig {
            max_retries: 5,
            ..AgentConfig::default()
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
