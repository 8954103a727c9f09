//! `outpost config init|show`

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};

use outpost_core::{config, paths, AgentConfig, ChannelName, ConfigError};

use super::home_dir;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a new config file.
    Init(InitArgs),
    /// Print the effective configuration as JSON.
    Show,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Management server base URL.
    #[arg(long)]
    pub server: String,

    /// This device's identification on the server.
    #[arg(long)]
    pub id: String,

    /// Install while streaming instead of download-then-install.
    #[arg(long)]
    pub streaming: bool,

    /// Feedback channel to sync; repeat for several. Defaults to `auditlog`.
    #[arg(long = "channel", value_name = "NAME")]
    pub channels: Vec<String>,

    /// Overwrite an existing config file.
    #[arg(long)]
    pub force: bool,
}

pub fn run(command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Init(args) => init(args),
        ConfigCommand::Show => show(),
    }
}

fn init(args: InitArgs) -> Result<()> {
    let path = paths::config_path(&home_dir()?);
    if path.exists() && !args.force {
        bail!(
            "config already exists at {}; pass --force to overwrite",
            path.display()
        );
    }

    let mut config = AgentConfig {
        server_url: args.server,
        identification: args.id,
        streaming: args.streaming,
        ..AgentConfig::default()
    };
    if !args.channels.is_empty() {
        config.feedback_channels = args.channels.into_iter().map(ChannelName::from).collect();
    }
    config::save(&config).context("failed to save config")?;

    println!("✓ Wrote {}", path.display());
    println!("  server: {}", config.base_url());
    println!("  id:     {}", config.identification);
    Ok(())
}

fn show() -> Result<()> {
    let config = match config::load() {
        Ok(config) => config,
        Err(ConfigError::ConfigNotFound { path }) => {
            eprintln!("no config at {}; showing defaults", path.display());
            AgentConfig::default()
        }
        Err(err) => return Err(err).context("failed to load config"),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&config).context("failed to render config")?
    );
    Ok(())
}
