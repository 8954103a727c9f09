//! Config error-message, atomic-write-safety, and round-trip integration tests.
//! Storage: ~/.outpost/config.yaml

use assert_fs::prelude::*;
use outpost_core::{config, AgentConfig, ChannelName, ConfigError};
use predicates::prelude::predicate;
use std::fs;

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ConfigNotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("config not found"));
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = home.path().join(".outpost");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("config.yaml"), b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"), "must contain file path, got: {err}");
}

#[test]
fn load_wrong_field_type_returns_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".outpost/config.yaml")
        .write_str("max_retries: plenty\n")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn save_cleans_up_tmp_file() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::save_at(home.path(), &AgentConfig::default()).expect("save");

    home.child(".outpost/config.yaml").assert(predicate::path::exists());
    home.child(".outpost/config.yaml.tmp")
        .assert(predicate::path::missing());
}

#[cfg(unix)]
#[test]
fn saved_config_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let home = assert_fs::TempDir::new().expect("tempdir");
    config::save_at(home.path(), &AgentConfig::default()).expect("save");
    let mode = fs::metadata(home.path().join(".outpost/config.yaml"))
        .expect("metadata")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
}

// ---------------------------------------------------------------------------
// 3. Round trip
// ---------------------------------------------------------------------------

#[test]
fn save_then_load_preserves_every_field() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let original = AgentConfig {
        server_url: "https://mgmt.example:8443".to_string(),
        identification: "gateway-17".to_string(),
        streaming: true,
        fix_package: true,
        sync_delay_secs: 1,
        sync_interval_secs: 120,
        max_retries: 3,
        feedback_channels: vec![ChannelName::from("auditlog"), ChannelName::from("metrics")],
        chunk_size: 4096,
        ..AgentConfig::default()
    };
    config::save_at(home.path(), &original).expect("save");

    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded, original);

    home.child(".outpost/config.yaml")
        .assert(predicate::str::contains("identification: gateway-17"));
}
