//! Mock driver
//!
//! Runs no process at all: writes the configured strings, waits
//! `run_for` and exits with `exit_code`. Used by tests and the demo
//! allocations of `allocx serve`.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use ax_core::api::ExecSpec;
use ax_core::config::serde_utils::duration_secs;

use super::{channels, DriverError, DriverInput, DriverOutput, ExecHandle, TaskDriver, KILLED_EXIT_CODE};

pub(super) const DRIVER_NAME: &str = "mock_driver";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// How long the fake command runs after writing its output
    #[serde(with = "duration_secs")]
    pub run_for: Duration,
    pub exit_code: i32,
    pub stdout_string: String,
    pub stderr_string: String,
}

impl MockConfig {
    pub fn new(run_for: Duration, exit_code: i32) -> Self {
        Self {
            run_for,
            exit_code,
            ..Default::default()
        }
    }

    pub fn with_output(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.stdout_string = stdout.into();
        self.stderr_string = stderr.into();
        self
    }
}

impl TaskDriver for MockConfig {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn start(&self, spec: &ExecSpec) -> Result<ExecHandle, DriverError> {
        tracing::debug!(command = ?spec.command, run_for = ?self.run_for, "Starting mock command");

        let (handle, mut driver) = channels();
        let config = self.clone();

        tokio::spawn(async move {
            if !config.stdout_string.is_empty() {
                let _ = driver
                    .output
                    .send(DriverOutput::Stdout(Bytes::from(config.stdout_string)))
                    .await;
            }
            if !config.stderr_string.is_empty() {
                let _ = driver
                    .output
                    .send(DriverOutput::Stderr(Bytes::from(config.stderr_string)))
                    .await;
            }

            let code = tokio::select! {
                _ = tokio::time::sleep(config.run_for) => config.exit_code,
                _ = driver.kill.cancelled() => KILLED_EXIT_CODE,
                code = wait_for_signal(&mut driver.input) => code,
            };

            let _ = driver.output.send(DriverOutput::Exited(code)).await;
        });

        Ok(handle)
    }
}

/// Discard input until a signal arrives; the fake command dies from it
async fn wait_for_signal(input: &mut mpsc::Receiver<DriverInput>) -> i32 {
    while let Some(message) = input.recv().await {
        if let DriverInput::Signal(kind) = message {
            return 128 + kind.number();
        }
    }
    std::future::pending().await
}
