//! CLI subprocess tests.
//!
//! These invoke the `atelier` binary and verify exit codes and output for
//! the paths that never reach the container engine.

use std::process::Command;

fn atelier_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_atelier"))
}

#[test]
fn cli_version_exits_zero() {
    let output = atelier_bin().arg("--version").output().unwrap();
    assert!(output.status.success(), "atelier --version must exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("atelier"),
        "version output must contain 'atelier': {stdout}"
    );
}

#[test]
fn cli_help_lists_lifecycle_commands() {
    let output = atelier_bin().arg("--help").output().unwrap();
    assert!(output.status.success(), "atelier --help must exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["create", "duplicate", "activate", "deactivate", "delete"] {
        assert!(stdout.contains(command), "help must list '{command}'");
    }
}

#[test]
fn cli_completions_mention_binary_name() {
    let output = atelier_bin().args(["completions", "bash"]).output().unwrap();
    assert!(output.status.success(), "completions must exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("atelier"));
}

#[test]
fn cli_unknown_subcommand_fails() {
    let output = atelier_bin().arg("summon").output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn cli_garbage_config_is_a_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.json");
    std::fs::write(&config, "{nope").unwrap();

    let output = atelier_bin()
        .args(["--config", &config.to_string_lossy(), "prune"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2), "validation errors exit 2");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error:"), "stderr: {stderr}");
}
