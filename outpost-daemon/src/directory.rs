//! Default [`Installable`]: keeps each installed artifact as a file.
//!
//! ```text
//! <home>/.outpost/installed/<agent|deployment>/
//!   current        (installed version, one line)
//!   <version>      (artifact bytes)
//! ```

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use outpost_core::{paths, TargetKind, UpdateInfo, Version};

use crate::error::{io_err, DaemonError};
use crate::target::Installable;

const CURRENT_FILE: &str = "current";

#[derive(Debug, Clone)]
pub struct DirectoryInstaller {
    kind: TargetKind,
    root: PathBuf,
}

impl DirectoryInstaller {
    pub fn new(kind: TargetKind, root: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            root: root.into(),
        }
    }

    /// Installer rooted at `<home>/.outpost/installed/<kind>/`.
    pub fn at_home(home: &Path, kind: TargetKind) -> Self {
        Self::new(kind, paths::installed_dir(home, kind))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self, version: &Version) -> PathBuf {
        self.root.join(version.to_string())
    }
}

impl Installable for DirectoryInstaller {
    fn installed_version(&self) -> Result<Version, DaemonError> {
        let path = self.root.join(CURRENT_FILE);
        match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Ok(Version::EMPTY),
            Ok(text) => Ok(text.trim().parse()?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Version::EMPTY),
            Err(err) => Err(io_err(path, err)),
        }
    }

    fn install(&self, info: &UpdateInfo, content: &mut dyn Read) -> Result<(), DaemonError> {
        fs::create_dir_all(&self.root).map_err(|e| io_err(&self.root, e))?;

        let target = self.artifact_path(&info.to);
        let tmp = self.root.join(format!("{}.tmp", info.to));
        let written = write_new(&tmp, content);
        let bytes = match written {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = fs::remove_file(&tmp);
                return Err(err);
            }
        };
        fs::rename(&tmp, &target).map_err(|e| io_err(&target, e))?;

        let current = self.root.join(CURRENT_FILE);
        let current_tmp = self.root.join(format!("{CURRENT_FILE}.tmp"));
        fs::write(&current_tmp, format!("{}\n", info.to)).map_err(|e| io_err(&current_tmp, e))?;
        fs::rename(&current_tmp, &current).map_err(|e| io_err(&current, e))?;

        tracing::info!(
            target_kind = %self.kind,
            version = %info.to,
            bytes,
            path = %target.display(),
            "artifact installed"
        );
        Ok(())
    }
}

fn write_new(path: &Path, content: &mut dyn Read) -> Result<u64, DaemonError> {
    let file = File::create(path).map_err(|e| io_err(path, e))?;
    let mut writer = BufWriter::new(file);
    let bytes = io::copy(content, &mut writer).map_err(|e| io_err(path, e))?;
    writer.flush().map_err(|e| io_err(path, e))?;
    Ok(bytes)
}
