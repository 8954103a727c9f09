//! Outpost agent runtime: update controller, installers, event bus and the
//! audit subscriber, driven by a tokio loop.

pub mod audit;
pub mod config_watch;
pub mod controller;
pub mod directory;
mod error;
pub mod events;
pub mod installer;
mod runtime;
pub mod strategy;
pub mod target;

pub use controller::{AgentContext, CycleReport, UpdateController};
pub use directory::DirectoryInstaller;
pub use error::DaemonError;
pub use events::{AgentEvent, EventBus, EventPublisher, RecordingPublisher};
pub use installer::{InstallOutcome, InstallState, Installer};
pub use runtime::{run_once_blocking, start_blocking, Agent, AgentStatus};
pub use strategy::{FetchContext, InstallStrategy};
pub use target::{Installable, UpdateTarget};
