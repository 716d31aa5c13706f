//! Integration tests for the outpost CLI surface and its start-up failures.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::Command;
use chrono::{TimeDelta, Utc};
use outpost_common::signature::{generate_signing_key, verifying_key_to_pem};
use outpost_common::{ActivationKey, AkInfo, SealKey};
use predicates::prelude::*;

const ENV_VARS: &[&str] = &[
    "OUTPOST_HOME",
    "OUTPOST_BOOTSTRAP_KEY",
    "OUTPOST_TRUST_KEY_FILE",
    "OUTPOST_RUNNER",
    "OUTPOST_EVENTS_PER_PING",
    "OUTPOST_WORKER_POLL_SECS",
    "OUTPOST_JOB_TIMEOUT_SECS",
    "OUTPOST_REQUEST_TIMEOUT_SECS",
    "OUTPOST_INSECURE_SKIP_VERIFY",
    "OUTPOST_USE_HARDWARE_ID",
    "OUTPOST_DEBUG",
];

fn outpost(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("outpost"));
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd.env("NO_COLOR", "1").arg("--home").arg(home);
    cmd
}

/// Write a fleet trust key and an activation key expiring at `valid_for`
/// from now. Returns the bootstrap key, hex encoded.
fn provision(home: &Path, valid_for: TimeDelta) -> String {
    let bootstrap = SealKey::generate();
    let trust = generate_signing_key();
    let info = AkInfo {
        host_uuid: "0b7f8c44-itest".into(),
        mac_address: "02:00:00:00:00:01".into(),
        control_plane_uri: "http://127.0.0.1:9".into(),
        expiry: Utc::now() + valid_for,
        verify_key: verifying_key_to_pem(&generate_signing_key().verifying_key()).unwrap(),
    };
    let blob = ActivationKey::issue(info, &trust)
        .unwrap()
        .seal(&bootstrap)
        .unwrap();
    std::fs::write(home.join("trust.pem"), verifying_key_to_pem(&trust.verifying_key()).unwrap())
        .unwrap();
    std::fs::write(home.join("activation.key"), blob).unwrap();
    bootstrap.to_hex()
}

// --- Help and version tests ---

#[test]
fn test_cli_no_args_shows_help_and_exits_two() {
    let home = tempfile::tempdir().unwrap();
    // --home alone is not a command; clap prints help and exits 2
    outpost(home.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn test_cli_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    outpost(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("launch"))
        .stdout(predicate::str::contains("activate"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn test_cli_version_flag_shows_version() {
    let home = tempfile::tempdir().unwrap();
    outpost(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("outpost"));
}

#[test]
fn test_cli_unknown_command_fails() {
    let home = tempfile::tempdir().unwrap();
    outpost(home.path()).arg("frobnicate").assert().code(2);
}

// --- status ---

#[test]
fn test_status_json_on_empty_home() {
    let home = tempfile::tempdir().unwrap();
    let out = outpost(home.path())
        .args(["status", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: serde_json::Value = serde_json::from_slice(&out).expect("status --json output");
    assert_eq!(report["activated"], false);
    assert_eq!(report["queue"]["jobs"], 0);
    assert_eq!(report["queue"]["results"], 0);
    assert_eq!(report["queue"]["events"], 0);
    assert!(
        report["problem"]
            .as_str()
            .unwrap()
            .contains("bootstrap key is not configured")
    );
}

#[test]
fn test_status_reports_expired_activation_key() {
    let home = tempfile::tempdir().unwrap();
    let bootstrap = provision(home.path(), TimeDelta::hours(-1));
    outpost(home.path())
        .env("OUTPOST_BOOTSTRAP_KEY", bootstrap)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("activation: inactive"))
        .stdout(predicate::str::contains("expired"));
}

#[test]
fn test_status_counts_pending_results() {
    let home = tempfile::tempdir().unwrap();
    let submit = home.path().join("data").join("submit");
    std::fs::create_dir_all(&submit).unwrap();
    std::fs::write(submit.join("job_3.result"), "{}").unwrap();
    std::fs::write(submit.join("20260101000000000000000.ev"), "{}").unwrap();
    outpost(home.path())
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""results": 1"#))
        .stdout(predicate::str::contains(r#""events": 1"#));
}

// --- launch start-up failures ---

#[test]
fn test_launch_without_runner_exits_127() {
    let home = tempfile::tempdir().unwrap();
    outpost(home.path())
        .env("OUTPOST_RUNNER", "outpost-no-such-runner")
        .arg("launch")
        .assert()
        .code(127)
        .stderr(predicate::str::contains("cannot find package runner"));
}

#[test]
fn test_launch_without_bootstrap_key_exits_1() {
    let home = tempfile::tempdir().unwrap();
    outpost(home.path())
        .env("OUTPOST_RUNNER", "sh")
        .arg("launch")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("bootstrap key is not configured"));
}

#[test]
fn test_launch_with_expired_activation_key_is_fatal() {
    let home = tempfile::tempdir().unwrap();
    let bootstrap = provision(home.path(), TimeDelta::hours(-1));
    outpost(home.path())
        .env("OUTPOST_RUNNER", "sh")
        .env("OUTPOST_BOOTSTRAP_KEY", bootstrap)
        .arg("launch")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("activation key expired"));
}

#[test]
fn test_activate_without_user_key_is_fatal() {
    let home = tempfile::tempdir().unwrap();
    let trust = generate_signing_key();
    std::fs::write(
        home.path().join("trust.pem"),
        verifying_key_to_pem(&trust.verifying_key()).unwrap(),
    )
    .unwrap();
    outpost(home.path())
        .env("OUTPOST_BOOTSTRAP_KEY", SealKey::generate().to_hex())
        .arg("activate")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("missing activation key"));
}

#[test]
fn test_invalid_numeric_setting_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    outpost(home.path())
        .env("OUTPOST_EVENTS_PER_PING", "lots")
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("OUTPOST_"));
}
