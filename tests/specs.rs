// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level specs for the taskctl surface.
//!
//! Exit-code contract: 0 accepted, 2 validation error, 3 daemon
//! unreachable.

use assert_cmd::Command;

fn taskctl() -> Command {
    Command::cargo_bin("taskctl").expect("taskctl binary")
}

#[test]
fn help_prints_subcommands() {
    let assert = taskctl().arg("--help").assert().success();
    let output = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(output.contains("submit"));
    assert!(output.contains("schedule"));
    assert!(output.contains("cancel"));
}

#[test]
fn version_matches_package() {
    taskctl()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn unknown_class_exits_with_validation_code() {
    taskctl()
        .args([
            "submit",
            "--name",
            "x",
            "--description",
            "echo",
            "--class",
            "enormous",
        ])
        .assert()
        .code(2);
}

#[test]
fn unknown_priority_exits_with_validation_code() {
    taskctl()
        .args([
            "submit",
            "--name",
            "x",
            "--description",
            "echo",
            "--priority",
            "asap",
        ])
        .assert()
        .code(2);
}

#[test]
fn missing_required_flag_exits_with_validation_code() {
    // clap reports usage errors with exit code 2.
    taskctl().args(["submit", "--name", "x"]).assert().code(2);
}

#[test]
fn unreachable_daemon_exits_with_unavailable_code() {
    let dir = tempfile::tempdir().unwrap();
    taskctl()
        .args(["--state-dir", dir.path().to_str().unwrap(), "status"])
        .assert()
        .code(3);
}

#[test]
fn list_against_missing_daemon_is_unavailable_not_a_panic() {
    let dir = tempfile::tempdir().unwrap();
    taskctl()
        .args(["--state-dir", dir.path().to_str().unwrap(), "list"])
        .assert()
        .code(3)
        .stderr(predicates::str::contains("cannot reach taskd"));
}
