//! Integration tests for the `fanlink` CLI binary.
//!
//! Argument parsing, completions, config handling and a short local run
//! against loopback sockets. No real fan arrays are involved.
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `fanlink` binary with env isolation.
///
/// Clears every `FANLINK_*` variable and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn fanlink_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("fanlink");
    cmd.env("HOME", "/tmp/fanlink-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/fanlink-cli-test-nonexistent")
        .env("RUST_LOG", "warn")
        .env_remove("FANLINK_PROFILE")
        .env_remove("FANLINK_OUTPUT")
        .env_remove("FANLINK_PASSCODE")
        .env_remove("FANLINK_DEFAULT_PROFILE");
    cmd
}

/// Loopback run flags; the broadcast port only needs to be routable.
const LOOPBACK_RUN: &[&str] = &[
    "run",
    "--passcode",
    "CT",
    "--bind-ip",
    "127.0.0.1",
    "--listener-port",
    "0",
    "--broadcast-ip",
    "127.0.0.1",
    "--broadcast-port",
    "65001",
    "--period-ms",
    "20",
];

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = fanlink_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    fanlink_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("fan-array")
            .and(predicate::str::contains("run"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    fanlink_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("fanlink"));
}

#[test]
fn test_run_help_lists_overrides() {
    fanlink_cmd().args(["run", "--help"]).assert().success().stdout(
        predicate::str::contains("--broadcast-ip")
            .and(predicate::str::contains("--watch"))
            .and(predicate::str::contains("--no-input")),
    );
}

// ── Argument validation ─────────────────────────────────────────────

#[test]
fn test_invalid_output_format() {
    let output = fanlink_cmd()
        .args(["-o", "xml", "config", "path"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_invalid_watch_kind() {
    let output = fanlink_cmd()
        .args(["run", "--watch", "everything"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_invalid_broadcast_ip_is_a_usage_error() {
    let output = fanlink_cmd()
        .args([
            "run",
            "--passcode",
            "CT",
            "--bind-ip",
            "127.0.0.1",
            "--listener-port",
            "0",
            "--broadcast-ip",
            "300.1.1.1",
            "--no-input",
        ])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = combined_output(&output);
    assert!(text.contains("broadcast"), "Expected broadcast error:\n{text}");
}

#[test]
fn test_unknown_profile_is_a_config_error() {
    let output = fanlink_cmd()
        .args(["-p", "nope"])
        .args(LOOPBACK_RUN)
        .arg("--no-input")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    let text = combined_output(&output);
    assert!(text.contains("nope"), "Expected profile name in error:\n{text}");
}

// ── Completions ─────────────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    fanlink_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fanlink"));
}

#[test]
fn test_completions_zsh() {
    fanlink_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path() {
    fanlink_cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fanlink").and(predicate::str::contains("config.toml")));
}

#[test]
fn test_config_show_json_without_file() {
    fanlink_cmd()
        .args(["config", "show", "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("profiles"));
}

#[test]
fn test_config_show_redacts_plaintext_passcode() {
    let dir = tempfile::tempdir().unwrap();
    let config_dir = dir.path().join("fanlink");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        "default_profile = \"lab\"\n\n[profiles.lab]\npasscode = \"hunter2\"\n",
    )
    .unwrap();

    fanlink_cmd()
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("lab").and(predicate::str::contains("hunter2").not()));
}

#[test]
fn test_config_defaults_pick_output_format() {
    let dir = tempfile::tempdir().unwrap();
    let config_dir = dir.path().join("fanlink");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        "default_profile = \"lab\"\n\n[defaults]\noutput = \"json-compact\"\n\n[profiles.lab]\n",
    )
    .unwrap();

    fanlink_cmd()
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"default_profile\":\"lab\""));

    // An explicit flag still wins.
    fanlink_cmd()
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["-o", "yaml", "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("default_profile: lab"));
}

#[test]
fn test_invalid_config_default_falls_back_to_table() {
    let dir = tempfile::tempdir().unwrap();
    let config_dir = dir.path().join("fanlink");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        "default_profile = \"lab\"\n\n[defaults]\noutput = \"xml\"\n\n[profiles.lab]\n",
    )
    .unwrap();

    fanlink_cmd()
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("default_profile = \"lab\""))
        .stderr(predicate::str::contains("xml"));
}

// ── Run ─────────────────────────────────────────────────────────────

#[test]
fn test_run_executes_stdin_commands_until_eof() {
    fanlink_cmd()
        .args(LOOPBACK_RUN)
        .args(["-o", "json-compact", "--watch", "registry"])
        .write_stdin("{\"op\":\"registry_snapshot\"}\n# comment\n\n{\"op\":\"bogus\"}\n")
        .timeout(Duration::from_secs(20))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kind\":\"registry\""))
        .stderr(predicate::str::contains("bogus"));
}

#[test]
fn test_run_with_duration_stops_on_its_own() {
    fanlink_cmd()
        .args(LOOPBACK_RUN)
        .args(["--no-input", "--duration", "1", "-o", "json-compact", "--watch", "network"])
        .timeout(Duration::from_secs(20))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kind\":\"network\""));
}
