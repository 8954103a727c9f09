//! `outpost start` and `outpost once`.

use anyhow::{Context, Result};
use clap::Args;

use outpost_daemon::{run_once_blocking, start_blocking, CycleReport, InstallOutcome};

use super::home_dir;

pub fn start() -> Result<()> {
    let home = home_dir()?;
    start_blocking(&home).context("agent exited with error")
}

#[derive(Args, Debug)]
pub struct OnceArgs {
    /// Print the cycle report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl OnceArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let report = run_once_blocking(&home).context("update cycle failed")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render cycle report")?
            );
            return Ok(());
        }
        print_report(&report);
        Ok(())
    }
}

fn print_report(report: &CycleReport) {
    if let Some(secs) = report.retry_after_secs {
        println!("server busy; retry in {secs}s");
    }
    if report.records_sent > 0 {
        println!("feedback: {} record(s) sent", report.records_sent);
    }
    println!("agent:      {}", describe(report.agent.as_ref()));
    println!("deployment: {}", describe(report.deployment.as_ref()));
    println!("next cycle in {}s", report.next_delay_secs);
}

fn describe(outcome: Option<&InstallOutcome>) -> String {
    match outcome {
        None => "not checked".to_string(),
        Some(InstallOutcome::UpToDate { installed }) if installed.is_empty() => {
            "nothing offered".to_string()
        }
        Some(InstallOutcome::UpToDate { installed }) => format!("up to date ({installed})"),
        Some(InstallOutcome::Skipped { version }) => format!("skipped {version}"),
        Some(InstallOutcome::Installed { version }) => format!("installed {version}"),
        Some(InstallOutcome::Failed { version, cause }) => {
            format!("failed to install {version}: {cause}")
        }
    }
}
