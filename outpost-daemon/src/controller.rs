//! One update cycle: flush feedback, then self-update, then deployment.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use outpost_core::{AgentConfig, ConfigStore, TargetKind};
use outpost_eventlog::FeedbackStore;
use outpost_sync::{channels_for, flush_all};
use outpost_transfer::HttpConnector;

use crate::error::DaemonError;
use crate::events::EventPublisher;
use crate::installer::{InstallOutcome, InstallState, Installer};
use crate::strategy::{FetchContext, InstallStrategy};
use crate::target::{Installable, UpdateTarget};

/// Collaborators of an agent, wired once at construction.
#[derive(Clone)]
pub struct AgentContext {
    pub config: Arc<ConfigStore>,
    pub connector: Arc<dyn HttpConnector>,
    pub feedback: Arc<FeedbackStore>,
    pub events: Arc<dyn EventPublisher>,
    pub agent_installable: Arc<dyn Installable>,
    pub deployment_installable: Arc<dyn Installable>,
    /// Where download-then-install keeps staging files.
    pub downloads_dir: PathBuf,
}

/// What one [`UpdateController::run_cycle`] did and when to run the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub started_at_unix: u64,
    pub next_delay_secs: u64,
    /// Set when the server asked us to back off and the cycle was cut short.
    pub retry_after_secs: Option<u64>,
    pub records_sent: usize,
    pub agent: Option<InstallOutcome>,
    pub deployment: Option<InstallOutcome>,
}

pub struct UpdateController {
    context: AgentContext,
    cancel: Arc<AtomicBool>,
    agent: Installer,
    deployment: Installer,
    strategy: InstallStrategy,
}

impl UpdateController {
    pub fn new(context: AgentContext, cancel: Arc<AtomicBool>) -> Self {
        let config = context.config.snapshot();
        let strategy = InstallStrategy::from_config(&config, &context.downloads_dir);
        let agent = Installer::new(UpdateTarget::new(
            TargetKind::Agent,
            context.agent_installable.clone(),
        ));
        let deployment = Installer::new(UpdateTarget::new(
            TargetKind::Deployment,
            context.deployment_installable.clone(),
        ));
        Self {
            context,
            cancel,
            agent,
            deployment,
            strategy,
        }
    }

    pub fn strategy(&self) -> &InstallStrategy {
        &self.strategy
    }

    pub fn state(&self, kind: TargetKind) -> &InstallState {
        match kind {
            TargetKind::Agent => self.agent.state(),
            TargetKind::Deployment => self.deployment.state(),
        }
    }

    /// Run one cycle against the current configuration snapshot.
    ///
    /// Never fails: errors are logged, and a back-off request from the
    /// server ends the cycle early with `next_delay_secs` set to the
    /// suggested delay.
    pub fn run_cycle(&mut self) -> CycleReport {
        let config = self.context.config.snapshot();
        self.apply_config(&config);

        let mut report = CycleReport {
            started_at_unix: unix_seconds_now(),
            next_delay_secs: config.sync_interval_secs,
            retry_after_secs: None,
            records_sent: 0,
            agent: None,
            deployment: None,
        };

        if let Err(err) = self.flush_feedback(&config, &mut report) {
            if let Some(secs) = err.retry_after() {
                return back_off(report, secs);
            }
            tracing::warn!(error = %err, "feedback flush failed");
        }

        let ctx = FetchContext {
            connector: self.context.connector.clone(),
            config: &config,
            cancel: self.cancel.clone(),
        };
        let events = self.context.events.as_ref();

        for kind in [TargetKind::Agent, TargetKind::Deployment] {
            let installer = match kind {
                TargetKind::Agent => &mut self.agent,
                TargetKind::Deployment => &mut self.deployment,
            };
            match installer.run_once(&ctx, &self.strategy, events) {
                Ok(outcome) => match kind {
                    TargetKind::Agent => report.agent = Some(outcome),
                    TargetKind::Deployment => report.deployment = Some(outcome),
                },
                Err(err) => {
                    if let Some(secs) = err.retry_after() {
                        tracing::info!(target_kind = %kind, secs, "server busy; ending cycle");
                        return back_off(report, secs);
                    }
                    if matches!(err, DaemonError::Stopped) {
                        tracing::info!(target_kind = %kind, "cycle stopped");
                        return report;
                    }
                    tracing::warn!(target_kind = %kind, error = %err, "update check failed");
                }
            }
        }
        report
    }

    /// Rebuild the strategy when the streaming flag flips; installer history
    /// does not carry over to the new strategy.
    fn apply_config(&mut self, config: &AgentConfig) {
        if self.strategy.is_streaming() == config.streaming {
            return;
        }
        tracing::info!(streaming = config.streaming, "install strategy changed");
        self.strategy = InstallStrategy::from_config(config, &self.context.downloads_dir);
        self.agent.reset();
        self.deployment.reset();
    }

    fn flush_feedback(
        &self,
        config: &AgentConfig,
        report: &mut CycleReport,
    ) -> Result<(), DaemonError> {
        let channels = channels_for(config, &self.context.feedback, self.context.connector.clone());
        for (name, sent) in flush_all(&channels)? {
            if sent.records_sent > 0 {
                tracing::info!(channel = %name, records = sent.records_sent, "feedback sent");
            }
            report.records_sent += sent.records_sent;
        }
        Ok(())
    }
}

impl std::fmt::Debug for UpdateController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateController")
            .field("strategy", &self.strategy)
            .field("agent", self.agent.state())
            .field("deployment", self.deployment.state())
            .finish_non_exhaustive()
    }
}

fn back_off(mut report: CycleReport, secs: u64) -> CycleReport {
    report.retry_after_secs = Some(secs);
    report.next_delay_secs = secs;
    report
}

pub(crate) fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
