//! On-disk layout, rooted at an explicit home directory.
//!
//! ```text
//! <home>/.outpost/
//!   config.yaml
//!   feedback/<channel>-<store>.<seq>
//!   downloads/<sha256(url)>.part
//!   installed/<agent|deployment>/
//! ```

use std::path::{Path, PathBuf};

use crate::types::TargetKind;

pub const CONFIG_FILE: &str = "config.yaml";

pub fn outpost_root(home: &Path) -> PathBuf {
    home.join(".outpost")
}

pub fn config_path(home: &Path) -> PathBuf {
    outpost_root(home).join(CONFIG_FILE)
}

pub fn feedback_dir(home: &Path) -> PathBuf {
    outpost_root(home).join("feedback")
}

pub fn downloads_dir(home: &Path) -> PathBuf {
    outpost_root(home).join("downloads")
}

pub fn installed_dir(home: &Path, kind: TargetKind) -> PathBuf {
    outpost_root(home).join("installed").join(kind.subsystem())
}
