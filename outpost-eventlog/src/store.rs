//! Registry of feedback channels.
//!
//! Every channel is owned by exactly one [`LogStoreManager`]. Managers are
//! only handed out through [`FeedbackStore::channel`], which returns the
//! same shared instance for the same name, so two writers can never race on
//! one channel's files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use outpost_core::ChannelName;

use crate::error::LogStoreError;
use crate::manager::LogStoreManager;

#[derive(Debug)]
pub struct FeedbackStore {
    dir: PathBuf,
    target_id: String,
    max_file_size: u64,
    channels: Mutex<BTreeMap<ChannelName, Arc<LogStoreManager>>>,
}

impl FeedbackStore {
    /// `dir` is usually [`outpost_core::paths::feedback_dir`]. Nothing is
    /// touched on disk until the first channel is opened.
    pub fn new(dir: impl Into<PathBuf>, target_id: impl Into<String>, max_file_size: u64) -> Self {
        Self {
            dir: dir.into(),
            target_id: target_id.into(),
            max_file_size,
            channels: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The manager for `name`, opening it on first use.
    pub fn channel(&self, name: &ChannelName) -> Result<Arc<LogStoreManager>, LogStoreError> {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(manager) = channels.get(name) {
            return Ok(Arc::clone(manager));
        }
        let manager = Arc::new(LogStoreManager::open(
            &self.dir,
            name.clone(),
            self.target_id.clone(),
            self.max_file_size,
        )?);
        channels.insert(name.clone(), Arc::clone(&manager));
        Ok(manager)
    }

    /// Names of the channels opened so far.
    pub fn open_channels(&self) -> Vec<ChannelName> {
        self.channels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn same_name_yields_same_manager() {
        let dir = TempDir::new().expect("dir");
        let store = FeedbackStore::new(dir.path(), "dev1", 1_000_000);
        let a = store.channel(&ChannelName::from("auditlog")).unwrap();
        let b = store.channel(&ChannelName::from("auditlog")).unwrap();
        let other = store.channel(&ChannelName::from("metrics")).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(
            store.open_channels(),
            vec![ChannelName::from("auditlog"), ChannelName::from("metrics")]
        );
    }

    #[test]
    fn channels_share_a_directory_without_mixing() {
        let dir = TempDir::new().expect("dir");
        let store = FeedbackStore::new(dir.path(), "dev1", 1_000_000);
        let audit = store.channel(&ChannelName::from("auditlog")).unwrap();
        let metrics = store.channel(&ChannelName::from("metrics")).unwrap();

        audit.write(1, Vec::new()).unwrap();
        audit.write(1, Vec::new()).unwrap();
        metrics.write(1, Vec::new()).unwrap();

        let store_id = metrics.current_store_id().unwrap();
        assert_eq!(metrics.highest_event_id(store_id).unwrap(), 1);
        let audit_store = audit.current_store_id().unwrap();
        assert_eq!(audit.highest_event_id(audit_store).unwrap(), 2);
    }
}
