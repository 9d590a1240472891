//! CLI integration tests
//!
//! Exercises the `allocx` binary with assert_cmd. Nothing here needs a
//! control plane: every case fails (or succeeds) before or at the first
//! connection attempt.

use assert_cmd::Command;
use predicates::prelude::*;

fn allocx() -> Command {
    let mut cmd = Command::cargo_bin("allocx")
        .expect("Failed to locate allocx binary - ensure it's built before running tests");
    cmd.env_remove("ALLOCX_ADDR").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    allocx()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("allocx"))
        .stdout(predicate::str::contains("Exec into running allocations"));
}

#[test]
fn test_cli_version() {
    allocx()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("allocx"));
}

#[test]
fn test_exec_help_lists_flags() {
    allocx()
        .args(["exec", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--task"))
        .stdout(predicate::str::contains("--escape"))
        .stdout(predicate::str::contains("--wait"));
}

#[test]
fn test_exec_without_arguments_is_usage_error() {
    allocx()
        .arg("exec")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_missing_command_prints_usage() {
    allocx()
        .args(["exec", "bad"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("A command is required"))
        .stderr(predicate::str::contains("Usage: allocx exec"));
}

#[test]
fn test_prefix_too_short() {
    allocx()
        .args(["exec", "2", "/bin/bash"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "Alloc ID must contain at least two characters",
        ));
}

#[test]
fn test_prefix_checked_before_command() {
    allocx()
        .args(["exec", "2"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "Alloc ID must contain at least two characters",
        ))
        .stderr(predicate::str::contains("A command is required").not());
}

#[test]
fn test_unresolvable_address() {
    allocx()
        .args([
            "exec",
            "--address",
            "nope",
            "26470238-5cf2-438f-8772-dc67cfb0705c",
            "/bin/bash",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error querying allocation"));
}

#[test]
fn test_address_from_environment() {
    allocx()
        .env("ALLOCX_ADDR", "127.0.0.1:1")
        .args(["exec", "26470238", "/bin/bash"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error querying allocation"))
        .stderr(predicate::str::contains("127.0.0.1:1"));
}

#[test]
fn test_invalid_escape_character() {
    allocx()
        .args(["exec", "--escape", "ab", "26470238", "/bin/bash"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("escape character"));
}

#[test]
fn test_completion_without_control_plane_prints_nothing() {
    allocx()
        .args(["complete", "alloc", "2647", "--address", "127.0.0.1:1"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_config_init_show_and_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("allocx.toml");
    let path_arg = path.to_str().unwrap();

    allocx()
        .args(["-c", path_arg, "config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("allocx.toml"));

    allocx()
        .args(["-c", path_arg, "config", "init"])
        .assert()
        .success();
    assert!(path.exists());

    allocx()
        .args(["-c", path_arg, "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[client]"))
        .stdout(predicate::str::contains("heartbeat_timeout = 30"));
}

#[test]
fn test_missing_explicit_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    allocx()
        .args(["-c", path.to_str().unwrap(), "exec", "26470238", "/bin/bash"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Config file not found"));
}
