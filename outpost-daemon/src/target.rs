//! Update targets: where versions are listed and how they get installed.

use std::io::Read;
use std::sync::Arc;

use outpost_core::{AgentConfig, TargetKind, UpdateInfo, Version};
use outpost_transfer::HttpConnector;

use crate::error::DaemonError;

/// The host-specific half of an update target.
pub trait Installable: Send + Sync {
    /// Currently installed version, [`Version::EMPTY`] when nothing is.
    fn installed_version(&self) -> Result<Version, DaemonError>;

    /// Consume `content` completely and install it as `info.to`.
    fn install(
        &self,
        info: &UpdateInfo,
        content: &mut dyn Read,
    ) -> Result<(), DaemonError>;
}

/// One of the two things the controller keeps current.
#[derive(Clone)]
pub struct UpdateTarget {
    kind: TargetKind,
    installable: Arc<dyn Installable>,
}

impl UpdateTarget {
    pub fn new(kind: TargetKind, installable: Arc<dyn Installable>) -> Self {
        Self { kind, installable }
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn installable(&self) -> &dyn Installable {
        self.installable.as_ref()
    }

    /// `{base}/agent/{id}/{symbolic name}/versions/` or
    /// `{base}/deployment/{id}/versions/`.
    pub fn versions_url(&self, config: &AgentConfig) -> String {
        match self.kind {
            TargetKind::Agent => format!(
                "{}/{}/{}/{}/versions/",
                config.base_url(),
                self.kind.subsystem(),
                config.identification,
                config.agent_symbolic_name
            ),
            TargetKind::Deployment => format!(
                "{}/{}/{}/versions/",
                config.base_url(),
                self.kind.subsystem(),
                config.identification
            ),
        }
    }

    /// Artifact URL for `version`; `from` requests a fix package.
    pub fn content_url(
        &self,
        config: &AgentConfig,
        version: &Version,
        from: Option<&Version>,
    ) -> String {
        let mut url = format!("{}{}", self.versions_url(config), version);
        if let Some(from) = from {
            url.push_str("?current=");
            url.push_str(&from.to_string());
        }
        url
    }

    /// Versions the server offers, ascending. Lines that do not parse as a
    /// version are skipped.
    pub fn available_versions(
        &self,
        config: &AgentConfig,
        connector: &dyn HttpConnector,
    ) -> Result<Vec<Version>, DaemonError> {
        let url = self.versions_url(config);
        let body = connector
            .get(&url, None)?
            .error_for_status(&url)?
            .into_string(&url)?;

        let mut versions: Vec<Version> = body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| match line.parse() {
                Ok(version) => Some(version),
                Err(err) => {
                    tracing::warn!(target_kind = %self.kind, line, error = %err, "ignoring bad version line");
                    None
                }
            })
            .collect();
        versions.sort();
        Ok(versions)
    }

    pub fn highest_available(
        &self,
        config: &AgentConfig,
        connector: &dyn HttpConnector,
    ) -> Result<Option<Version>, DaemonError> {
        Ok(self.available_versions(config, connector)?.pop())
    }
}

impl std::fmt::Debug for UpdateTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateTarget")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
