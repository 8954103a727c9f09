//! Per-target installer state machine.
//!
//! ```text
//! NoAttempt ──attempt──▶ Attempting(v) ──ok──▶ Succeeded(v)
//!                                      └─err─▶ Failed(v, n)
//! ```
//!
//! A version that succeeded, or that failed `max_retries` times, is not
//! attempted again. A newer version on the server starts a fresh count.

use serde::Serialize;

use outpost_core::{UpdateInfo, Version};

use crate::error::DaemonError;
use crate::events::{AgentEvent, EventPublisher};
use crate::strategy::{FetchContext, InstallStrategy};
use crate::target::UpdateTarget;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InstallState {
    #[default]
    NoAttempt,
    Attempting {
        version: Version,
    },
    Succeeded {
        version: Version,
    },
    Failed {
        version: Version,
        failures: u32,
    },
}

impl InstallState {
    /// Version the state refers to, if any.
    pub fn version(&self) -> Option<&Version> {
        match self {
            InstallState::NoAttempt => None,
            InstallState::Attempting { version }
            | InstallState::Succeeded { version }
            | InstallState::Failed { version, .. } => Some(version),
        }
    }

    fn failures_for(&self, candidate: &Version) -> u32 {
        match self {
            InstallState::Failed { version, failures } if version == candidate => *failures,
            _ => 0,
        }
    }
}

/// Result of one [`Installer::run_once`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InstallOutcome {
    /// Nothing newer than the installed version is offered.
    UpToDate { installed: Version },
    /// The offered version already succeeded or exhausted its retries.
    Skipped { version: Version },
    Installed { version: Version },
    Failed { version: Version, cause: String },
}

#[derive(Debug)]
pub struct Installer {
    target: UpdateTarget,
    state: InstallState,
}

impl Installer {
    pub fn new(target: UpdateTarget) -> Self {
        Self {
            target,
            state: InstallState::NoAttempt,
        }
    }

    pub fn target(&self) -> &UpdateTarget {
        &self.target
    }

    pub fn state(&self) -> &InstallState {
        &self.state
    }

    /// Forget all attempt history.
    pub fn reset(&mut self) {
        self.state = InstallState::NoAttempt;
    }

    /// Check the server and install its highest version if warranted.
    ///
    /// Install failures are absorbed into the state machine and reported as
    /// [`InstallOutcome::Failed`]. Errors are returned only when no attempt
    /// was counted: the listing could not be fetched, the server asked to
    /// back off, or the agent is stopping.
    pub fn run_once(
        &mut self,
        ctx: &FetchContext<'_>,
        strategy: &InstallStrategy,
        events: &dyn EventPublisher,
    ) -> Result<InstallOutcome, DaemonError> {
        let kind = self.target.kind();
        let installed = self.target.installable().installed_version()?;
        let Some(available) = self
            .target
            .highest_available(ctx.config, ctx.connector.as_ref())?
        else {
            return Ok(InstallOutcome::UpToDate { installed });
        };
        if available <= installed {
            tracing::debug!(target_kind = %kind, %installed, "up to date");
            return Ok(InstallOutcome::UpToDate { installed });
        }

        if self.should_skip(&available, ctx.config.max_retries) {
            tracing::debug!(target_kind = %kind, version = %available, state = ?self.state, "skipping version");
            return Ok(InstallOutcome::Skipped { version: available });
        }

        let fix_from = (ctx.config.fix_package && !installed.is_empty()).then(|| installed.clone());
        let url = self
            .target
            .content_url(ctx.config, &available, fix_from.as_ref());
        let info = UpdateInfo::new(kind, installed, available.clone(), fix_from.is_some());

        let previous = std::mem::replace(
            &mut self.state,
            InstallState::Attempting {
                version: available.clone(),
            },
        );
        tracing::info!(target_kind = %kind, %info, url = %url, "installation started");
        events.publish(AgentEvent::InstallationStarted { info: info.clone() });

        match strategy.fetch_and_install(ctx, &self.target, &info, &url) {
            Ok(()) => {
                tracing::info!(target_kind = %kind, version = %available, "installation complete");
                self.state = InstallState::Succeeded {
                    version: available.clone(),
                };
                events.publish(AgentEvent::InstallationCompleted {
                    info,
                    success: true,
                    cause: None,
                });
                Ok(InstallOutcome::Installed { version: available })
            }
            Err(err) if err.retry_after().is_some() || matches!(err, DaemonError::Stopped) => {
                // Not the artifact's fault; the attempt does not count.
                tracing::info!(target_kind = %kind, version = %available, error = %err, "installation interrupted");
                self.state = previous;
                events.publish(AgentEvent::InstallationCompleted {
                    info,
                    success: false,
                    cause: Some(err.to_string()),
                });
                Err(err)
            }
            Err(err) => {
                let failures = previous.failures_for(&available) + 1;
                tracing::warn!(target_kind = %kind, version = %available, failures, error = %err, "installation failed");
                self.state = InstallState::Failed {
                    version: available.clone(),
                    failures,
                };
                let cause = err.to_string();
                events.publish(AgentEvent::InstallationCompleted {
                    info,
                    success: false,
                    cause: Some(cause.clone()),
                });
                Ok(InstallOutcome::Failed {
                    version: available,
                    cause,
                })
            }
        }
    }

    fn should_skip(&self, available: &Version, max_retries: u32) -> bool {
        match &self.state {
            InstallState::Succeeded { version } => version == available,
            InstallState::Failed { version, failures } => {
                version == available && *failures >= max_retries
            }
            InstallState::NoAttempt | InstallState::Attempting { .. } => false,
        }
    }
}
