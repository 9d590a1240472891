//! End-to-end tests
//!
//! Runs the control plane in-process on an ephemeral port and drives the
//! real `allocx` binary against it.

use std::sync::Arc;
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use ax_core::config::ServerConfig;
use ax_core::ClientStatus;
use ax_server::{Allocation, MockConfig, RawExecConfig, Server, ServerState};

const MOCK_ID: &str = "26470238-5cf2-438f-8772-dc67cfb0705c";
const RAW_ID: &str = "9a1b2c3d-5e6f-4a0b-8c1d-2e3f4a5b6c7d";
const TWIN_A: &str = "77770000-aaaa-4000-8000-000000000001";
const TWIN_B: &str = "77770000-bbbb-4000-8000-000000000002";

struct TestControlPlane {
    address: String,
    cancel: CancellationToken,
    _runtime: Runtime,
}

impl Drop for TestControlPlane {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl TestControlPlane {
    fn start() -> Self {
        let runtime = Runtime::new().unwrap();
        let state = Arc::new(ServerState::new(ServerConfig {
            node_name: Some("e2e".into()),
            ..Default::default()
        }));

        state.upsert_allocation(
            Allocation::new("example.web[0]", "web")
                .with_id(MOCK_ID)
                .with_task(
                    "web",
                    MockConfig::new(Duration::from_millis(1), 21)
                        .with_output("sample stdout output\n", "sample stderr output\n"),
                )
                .with_status(ClientStatus::Running),
        );
        state.upsert_allocation(
            Allocation::new("example.raw[0]", "raw")
                .with_id(RAW_ID)
                .with_task("raw", RawExecConfig::default())
                .with_status(ClientStatus::Running),
        );
        for id in [TWIN_A, TWIN_B] {
            state.upsert_allocation(
                Allocation::new("example.twin[0]", "twin")
                    .with_id(id)
                    .with_task("twin", MockConfig::default())
                    .with_status(ClientStatus::Running),
            );
        }

        let cancel = CancellationToken::new();
        let server = Server::new(state, cancel.clone());
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let address = listener.local_addr().unwrap().to_string();
        runtime.spawn(async move { server.serve(listener).await });

        Self {
            address,
            cancel,
            _runtime: runtime,
        }
    }

    fn allocx(&self) -> Command {
        let mut cmd = Command::cargo_bin("allocx")
            .expect("Failed to locate allocx binary - ensure it's built before running tests");
        cmd.env_remove("RUST_LOG")
            .env("ALLOCX_ADDR", &self.address)
            .timeout(Duration::from_secs(30));
        cmd
    }
}

#[test]
fn test_e2e_exit_code_and_output() {
    let plane = TestControlPlane::start();

    plane
        .allocx()
        .args(["exec", &MOCK_ID[..8], "/bin/bash"])
        .assert()
        .code(21)
        .stdout(predicate::str::contains("sample stdout output"))
        .stderr(predicate::str::contains("sample stderr output"));
}

#[test]
fn test_e2e_non_interactive() {
    let plane = TestControlPlane::start();

    plane
        .allocx()
        .args(["exec", "-i", "false", "-t", "false", MOCK_ID, "/bin/bash"])
        .assert()
        .code(21)
        .stdout(predicate::str::contains("sample stdout output"));
}

#[test]
fn test_e2e_unknown_allocation() {
    let plane = TestControlPlane::start();

    plane
        .allocx()
        .args(["exec", "ffffffff", "/bin/bash"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No allocation(s) with prefix or id"));
}

#[test]
fn test_e2e_ambiguous_prefix_lists_candidates() {
    let plane = TestControlPlane::start();

    plane
        .allocx()
        .args(["exec", "7777", "/bin/bash"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Prefix matched multiple allocations"))
        .stderr(predicate::str::contains(TWIN_A))
        .stderr(predicate::str::contains(TWIN_B));
}

#[test]
fn test_e2e_autocomplete_prefix() {
    let plane = TestControlPlane::start();

    plane
        .allocx()
        .args(["complete", "alloc", &MOCK_ID[..5]])
        .assert()
        .success()
        .stdout(predicate::str::diff(format!("{}\n", MOCK_ID)));
}

#[cfg(unix)]
#[test]
fn test_e2e_remote_exit_code() {
    let plane = TestControlPlane::start();

    plane
        .allocx()
        .args(["exec", "-t", "false", RAW_ID, "sh", "-c", "echo from-remote; exit 3"])
        .assert()
        .code(3)
        .stdout(predicate::str::contains("from-remote"));
}

#[cfg(unix)]
#[test]
fn test_e2e_stdin_is_forwarded() {
    let plane = TestControlPlane::start();

    plane
        .allocx()
        .args(["exec", "-t", "false", RAW_ID, "cat"])
        .write_stdin("first line\nsecond line\n")
        .assert()
        .success()
        .stdout("first line\nsecond line\n");
}

#[cfg(unix)]
#[test]
fn test_e2e_command_not_found() {
    let plane = TestControlPlane::start();

    plane
        .allocx()
        .args(["exec", "-t", "false", RAW_ID, "definitely-not-a-command-xyz"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("executable file not found"));
}
