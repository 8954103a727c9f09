use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use outpost_core::{config, paths, ConfigStore, TargetKind};
use outpost_eventlog::FeedbackStore;
use outpost_transfer::UreqConnector;

use crate::audit::{audit_channel, audit_task};
use crate::config_watch::spawn_config_watch;
use crate::controller::{AgentContext, CycleReport, UpdateController};
use crate::directory::DirectoryInstaller;
use crate::error::{io_err, DaemonError};
use crate::events::EventBus;
use crate::installer::InstallState;

/// Snapshot returned by [`Agent::status`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgentStatus {
    pub running: bool,
    pub cycles: u64,
    pub last_cycle_at_unix: Option<u64>,
    pub next_delay_secs: Option<u64>,
    pub agent: InstallState,
    pub deployment: InstallState,
}

/// The field agent: an update loop plus the audit subscriber.
pub struct Agent {
    context: AgentContext,
    bus: EventBus,
    cancel: Arc<AtomicBool>,
    shutdown: broadcast::Sender<()>,
    status: Arc<Mutex<AgentStatus>>,
    /// Home whose `config.yaml` is reloaded on change, if any.
    config_home: Option<PathBuf>,
    tasks: Vec<(&'static str, JoinHandle<Result<(), DaemonError>>)>,
}

impl Agent {
    /// `bus` must be the publisher behind `context.events` for the audit
    /// subscriber to see installer events.
    pub fn new(context: AgentContext, bus: EventBus) -> Self {
        let (shutdown, _) = broadcast::channel(16);
        Self {
            context,
            bus,
            cancel: Arc::new(AtomicBool::new(false)),
            shutdown,
            status: Arc::new(Mutex::new(AgentStatus::default())),
            config_home: None,
            tasks: Vec::new(),
        }
    }

    /// Reload `<home>/.outpost/config.yaml` into the config store whenever
    /// it changes while the agent runs.
    pub fn watch_config_file(mut self, home: &Path) -> Self {
        self.config_home = Some(home.to_path_buf());
        self
    }

    /// Production wiring rooted at `home`.
    pub fn at_home(home: &Path, config: Arc<ConfigStore>) -> Result<Self, DaemonError> {
        ensure_runtime_dirs(home)?;
        let snapshot = config.snapshot();
        let bus = EventBus::new();
        bus.watch_config(&config);
        let context = AgentContext {
            connector: Arc::new(UreqConnector::from_config(&snapshot)),
            feedback: Arc::new(FeedbackStore::new(
                paths::feedback_dir(home),
                snapshot.identification.clone(),
                snapshot.max_log_file_size,
            )),
            events: Arc::new(bus.clone()),
            agent_installable: Arc::new(DirectoryInstaller::at_home(home, TargetKind::Agent)),
            deployment_installable: Arc::new(DirectoryInstaller::at_home(
                home,
                TargetKind::Deployment,
            )),
            downloads_dir: paths::downloads_dir(home),
            config,
        };
        Ok(Self::new(context, bus).watch_config_file(home))
    }

    /// Spawn the update loop and the audit subscriber on the current tokio
    /// runtime. The first cycle runs after `sync_delay_secs`.
    pub fn start(&mut self) -> Result<(), DaemonError> {
        if !self.tasks.is_empty() {
            return Err(DaemonError::AlreadyRunning);
        }
        self.cancel.store(false, Ordering::SeqCst);
        let config = self.context.config.snapshot();

        let audit = if config.feedback_channels.contains(&audit_channel()) {
            Some(self.context.feedback.channel(&audit_channel())?)
        } else {
            None
        };
        if let Some(home) = &self.config_home {
            let watch = spawn_config_watch(
                home,
                self.context.config.clone(),
                self.shutdown.subscribe(),
            )?;
            self.tasks.push(("config-watch", watch));
        }

        if let Some(channel) = audit {
            let events = self.bus.subscribe();
            let shutdown_rx = self.shutdown.subscribe();
            self.tasks.push((
                "audit",
                tokio::spawn(audit_task(events, channel, shutdown_rx)),
            ));
        }

        let controller = UpdateController::new(self.context.clone(), self.cancel.clone());
        let delay = Duration::from_secs(config.sync_delay_secs);
        let status = self.status.clone();
        let config_store = self.context.config.clone();
        let shutdown_rx = self.shutdown.subscribe();
        self.tasks.push((
            "controller",
            tokio::spawn(controller_task(
                controller,
                config_store,
                delay,
                status,
                shutdown_rx,
            )),
        ));

        set_running(&self.status, true);
        tracing::info!(
            server = %config.base_url(),
            id = %config.identification,
            "agent started"
        );
        Ok(())
    }

    /// Stop cooperatively: in-flight transfers see the cancel flag, the loop
    /// sees the shutdown signal, and both tasks are awaited.
    pub async fn stop(&mut self) -> Result<(), DaemonError> {
        self.cancel.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(());
        let mut first_error = None;
        for (name, handle) in self.tasks.drain(..) {
            if let Err(err) = handle_join(name, handle.await) {
                tracing::error!(task = name, error = %err, "task ended with error");
                first_error.get_or_insert(err);
            }
        }
        set_running(&self.status, false);
        tracing::info!("agent stopped");
        first_error.map_or(Ok(()), Err)
    }

    pub fn status(&self) -> AgentStatus {
        self.status
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }
}

async fn controller_task(
    controller: UpdateController,
    config: Arc<ConfigStore>,
    first_delay: Duration,
    status: Arc<Mutex<AgentStatus>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let controller = Arc::new(Mutex::new(controller));
    let mut delay = first_delay;
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        let cycle = Arc::clone(&controller);
        let joined = tokio::task::spawn_blocking(move || {
            cycle
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .run_cycle()
        })
        .await;

        delay = match joined {
            Ok(report) => {
                let controller = controller.lock().unwrap_or_else(|p| p.into_inner());
                record_cycle(&status, &controller, &report);
                tracing::debug!(next_delay_secs = report.next_delay_secs, "cycle finished");
                Duration::from_secs(report.next_delay_secs)
            }
            Err(err) => {
                let secs = config.snapshot().sync_interval_secs;
                tracing::error!(error = %err, next_delay_secs = secs, "update cycle aborted");
                Duration::from_secs(secs)
            }
        };
    }
    Ok(())
}

fn record_cycle(status: &Mutex<AgentStatus>, controller: &UpdateController, report: &CycleReport) {
    let mut status = status.lock().unwrap_or_else(|p| p.into_inner());
    status.cycles += 1;
    status.last_cycle_at_unix = Some(report.started_at_unix);
    status.next_delay_secs = Some(report.next_delay_secs);
    status.agent = controller.state(TargetKind::Agent).clone();
    status.deployment = controller.state(TargetKind::Deployment).clone();
}

fn set_running(status: &Mutex<AgentStatus>, running: bool) {
    status.lock().unwrap_or_else(|p| p.into_inner()).running = running;
}

/// Load configuration, start the agent and block until ctrl-c.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let config = Arc::new(ConfigStore::new(config::load_or_default_at(home)?));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;

    runtime.block_on(async {
        let mut agent = Agent::at_home(home, config)?;
        agent.start()?;
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("received ctrl-c, shutting down agent"),
            Err(err) => tracing::error!(error = %err, "ctrl-c handler failed, shutting down agent"),
        }
        agent.stop().await
    })
}

/// Run a single cycle immediately, without the startup delay.
pub fn run_once_blocking(home: &Path) -> Result<CycleReport, DaemonError> {
    init_tracing();
    let config = Arc::new(ConfigStore::new(config::load_or_default_at(home)?));
    let agent = Agent::at_home(home, config)?;

    let audit = agent
        .context
        .config
        .snapshot()
        .feedback_channels
        .contains(&audit_channel());
    let mut events = agent.bus.subscribe();
    let mut controller = UpdateController::new(agent.context.clone(), agent.cancel.clone());
    let report = controller.run_cycle();

    if audit {
        let channel = agent.context.feedback.channel(&audit_channel())?;
        while let Ok(event) = events.try_recv() {
            if let Err(err) = crate::audit::record_event(&channel, &event) {
                tracing::warn!(error = %err, "audit record not written");
            }
        }
    }
    Ok(report)
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [paths::feedback_dir(home), paths::downloads_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Join(task, err.to_string())),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
