//! CLI integration tests
//!
//! Exercises the burrow binary surface with assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;

fn burrow() -> Command {
    Command::cargo_bin("burrow").expect("burrow binary should be built")
}

#[test]
fn help_describes_the_tool() {
    burrow()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("SSH reverse tunnels"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("version"));
}

#[test]
fn version_subcommand_prints_version() {
    burrow()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn version_flag_works() {
    burrow().arg("--version").assert().success();
}

#[test]
fn run_help_documents_config_flag() {
    burrow()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--interval"))
        .stdout(predicate::str::contains("--verbose"));
}

#[test]
fn unknown_subcommand_fails() {
    burrow()
        .arg("dig")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn run_with_missing_config_exits_nonzero() {
    burrow()
        .args(["run", "--config", "/nonexistent/burrow/config.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load tunnel config"));
}

#[test]
fn run_with_invalid_config_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{not a descriptor array").unwrap();

    burrow()
        .args(["run", "--config", path.to_str().unwrap()])
        .assert()
        .failure();
}

#[cfg(unix)]
#[test]
fn sigterm_shuts_down_cleanly() {
    use std::process::{Command as StdCommand, Stdio};
    use std::time::Duration;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "[]").unwrap();

    let binary = assert_cmd::cargo::cargo_bin("burrow");
    let mut child = StdCommand::new(binary)
        .args(["run", "--config", path.to_str().unwrap()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("daemon should start");

    // Give the supervisor a moment to come up, then ask it to stop.
    std::thread::sleep(Duration::from_millis(500));
    let kill = StdCommand::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .expect("kill should run");
    assert!(kill.success());

    let status = child.wait().expect("daemon should exit");
    assert!(status.success(), "expected exit 0 after SIGTERM, got {status:?}");
}
