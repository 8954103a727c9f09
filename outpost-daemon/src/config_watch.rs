//! Reloads `config.yaml` into the [`ConfigStore`] when it changes on disk.
//!
//! `save_at` replaces the file by rename, so the watch is on its directory
//! and events are filtered by file name.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use outpost_core::{config, paths, ConfigError, ConfigStore};

use crate::error::{io_err, DaemonError};

/// Start watching `<home>/.outpost/config.yaml`.
///
/// The watch is registered before this returns; changes made afterwards are
/// picked up by the spawned task until shutdown.
pub fn spawn_config_watch(
    home: &Path,
    store: Arc<ConfigStore>,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<JoinHandle<Result<(), DaemonError>>, DaemonError> {
    let root = paths::outpost_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }

    let (event_tx, event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&root, RecursiveMode::NonRecursive)?;
    tracing::debug!(dir = %root.display(), "watching configuration");

    Ok(tokio::spawn(config_watch_task(
        home.to_path_buf(),
        watcher,
        event_rx,
        store,
        shutdown_rx,
    )))
}

async fn config_watch_task(
    home: PathBuf,
    _watcher: RecommendedWatcher,
    mut event_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    store: Arc<ConfigStore>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "config watcher event error");
                        continue;
                    }
                };
                if is_relevant_event_kind(&event.kind) && event.paths.iter().any(|p| is_config_file(p)) {
                    reload(&home, &store);
                }
            }
        }
    }
    Ok(())
}

/// Load the config file and publish it if it differs from the current
/// snapshot. A missing or unparseable file keeps the current configuration.
pub fn reload(home: &Path, store: &ConfigStore) -> bool {
    match config::load_at(home) {
        Ok(config) => {
            let changed = store.replace(config);
            if changed {
                tracing::info!("configuration reloaded");
            }
            changed
        }
        Err(ConfigError::ConfigNotFound { path }) => {
            tracing::warn!(path = %path.display(), "config file removed; keeping current configuration");
            false
        }
        Err(err) => {
            tracing::warn!(error = %err, "config reload failed; keeping current configuration");
            false
        }
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

fn is_config_file(path: &Path) -> bool {
    path.file_name() == Some(OsStr::new(paths::CONFIG_FILE))
}
