use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use outpost_core::{config, AgentConfig, ChannelName};

fn outpost_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("outpost"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("RUST_LOG", "error");
    cmd
}

#[test]
fn config_init_writes_and_show_reads_back() {
    let home = TempDir::new().expect("home");

    outpost_cmd(home.path())
        .args([
            "config",
            "init",
            "--server",
            "http://updates.example/",
            "--id",
            "dev-42",
            "--channel",
            "auditlog",
            "--channel",
            "metrics",
        ])
        .assert()
        .success()
        .stdout(contains("server: http://updates.example"));

    let saved = config::load_at(home.path()).expect("saved config");
    assert_eq!(saved.identification, "dev-42");
    assert_eq!(
        saved.feedback_channels,
        vec![ChannelName::from("auditlog"), ChannelName::from("metrics")]
    );

    outpost_cmd(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(contains("\"identification\": \"dev-42\""));
}

#[test]
fn config_init_refuses_to_overwrite_without_force() {
    let home = TempDir::new().expect("home");
    let args = ["config", "init", "--server", "http://a", "--id", "one"];

    outpost_cmd(home.path()).args(args).assert().success();
    outpost_cmd(home.path())
        .args(args)
        .assert()
        .failure()
        .stderr(contains("--force"));
    outpost_cmd(home.path())
        .args(["config", "init", "--server", "http://b", "--id", "two", "--force"])
        .assert()
        .success();

    assert_eq!(config::load_at(home.path()).unwrap().identification, "two");
}

#[test]
fn config_show_falls_back_to_defaults() {
    let home = TempDir::new().expect("home");

    outpost_cmd(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(contains("\"sync_interval_secs\": 30"))
        .stderr(contains("showing defaults"));
}

#[test]
fn once_reports_unreachable_server_without_failing() {
    let home = TempDir::new().expect("home");
    config::save_at(
        home.path(),
        &AgentConfig {
            // Nothing listens on the discard port.
            server_url: "http://127.0.0.1:9".to_string(),
            sync_interval_secs: 77,
            connect_timeout_secs: 2,
            read_timeout_secs: 2,
            ..AgentConfig::default()
        },
    )
    .expect("save");

    outpost_cmd(home.path())
        .args(["once", "--json"])
        .assert()
        .success()
        .stdout(contains("\"next_delay_secs\": 77"))
        .stdout(contains("\"agent\": null"));

    assert!(home.path().join(".outpost/feedback").is_dir());
    assert!(fs::read_dir(home.path().join(".outpost/downloads")).is_ok());
}
