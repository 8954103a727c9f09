//! Outpost — field agent for managed devices.
//!
//! # Usage
//!
//! ```text
//! outpost start
//! outpost once [--json]
//! outpost config init --server <url> --id <identification> [--streaming] [--force]
//! outpost config show
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{agent::OnceArgs, config::ConfigCommand};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "outpost",
    version,
    about = "Keep this device's agent and deployment up to date",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the agent in the foreground until ctrl-c.
    Start,

    /// Run a single update cycle now and print what it did.
    Once(OnceArgs),

    /// Create or inspect ~/.outpost/config.yaml.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Start => commands::agent::start(),
        Commands::Once(args) => args.run(),
        Commands::Config { command } => commands::config::run(command),
    }
}
