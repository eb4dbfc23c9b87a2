//! Smoke tests -- verify the binary runs and its subcommands behave.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

mod common;

#[test]
fn test_cli_help() {
    Command::cargo_bin("opsmedic")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("remediation orchestration engine"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("opsmedic")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("opsmedic"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("opsmedic")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicates::str::contains("--log-format"));
}

#[test]
fn test_validate_alert_accepts_valid_payload() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", common::alert_json("buggy-app-v2", "memory_saturation")).unwrap();

    Command::cargo_bin("opsmedic")
        .unwrap()
        .args(["validate-alert", "--file"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicates::str::contains("\"breach_kind\": \"memory-saturation\""))
        .stdout(predicates::str::contains("buggy-app-v2"));
}

#[test]
fn test_validate_alert_rejects_missing_field() {
    let mut payload = common::alert_json("svc-1", "crash-loop");
    payload.as_object_mut().unwrap().remove("breached_slo");
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", payload).unwrap();

    Command::cargo_bin("opsmedic")
        .unwrap()
        .args(["validate-alert", "--file"])
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicates::str::contains("breached_slo"));
}

#[test]
fn test_show_config_prints_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("opsmedic.toml");
    std::fs::write(&path, "[lifecycle]\nmax_attempts = 5\n").unwrap();

    Command::cargo_bin("opsmedic")
        .unwrap()
        .args(["show-config", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicates::str::contains("max_attempts = 5"))
        .stdout(predicates::str::contains("cooldown_sec = 60"))
        .stdout(predicates::str::contains("[reasoning.retry]").or(predicates::str::contains("[reasoning]")));
}
