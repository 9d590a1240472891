//! Task drivers
//!
//! A driver starts the command of an exec session inside a task and
//! exposes it as a pair of channels. Output arrives on
//! [`ExecHandle::output`] in the order the process produced it, and
//! [`DriverOutput::Exited`] is always the last item.

mod mock;
mod pty;
mod raw_exec;

pub use mock::MockConfig;
pub use raw_exec::RawExecConfig;

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ax_core::api::ExecSpec;
use ax_protocol::{ErrorCode, SignalKind, TerminalSize};

/// Drivers every node advertises
pub const DRIVERS: &[&str] = &[mock::DRIVER_NAME, raw_exec::DRIVER_NAME];

/// Channel depth between a session and its driver
const CHANNEL_CAPACITY: usize = 64;

/// How long output may keep draining once the process has exited.
///
/// A background child holding the output open past this loses the rest.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Exit code reported for a process stopped by `Cancel`
pub const KILLED_EXIT_CODE: i32 = 137;

/// Input for the running command
#[derive(Debug, Clone, PartialEq)]
pub enum DriverInput {
    Stdin(Bytes),
    StdinClose,
    Resize(TerminalSize),
    Signal(SignalKind),
}

/// Output from the running command
#[derive(Debug, Clone, PartialEq)]
pub enum DriverOutput {
    Stdout(Bytes),
    Stderr(Bytes),
    Exited(i32),
}

/// Channels attached to a started command
pub struct ExecHandle {
    pub input: mpsc::Sender<DriverInput>,
    pub output: mpsc::Receiver<DriverOutput>,
    /// Cancelling stops the command; `Exited` still follows
    pub kill: CancellationToken,
}

/// Driver-side halves of an [`ExecHandle`]
pub(crate) struct DriverChannels {
    pub input: mpsc::Receiver<DriverInput>,
    pub output: mpsc::Sender<DriverOutput>,
    pub kill: CancellationToken,
}

pub(crate) fn channels() -> (ExecHandle, DriverChannels) {
    let (input_tx, input_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (output_tx, output_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let kill = CancellationToken::new();
    (
        ExecHandle {
            input: input_tx,
            output: output_rx,
            kill: kill.clone(),
        },
        DriverChannels {
            input: input_rx,
            output: output_tx,
            kill,
        },
    )
}

/// Errors starting a command
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("exec: \"{0}\": executable file not found")]
    CommandNotFound(String),

    #[error("Failed to start \"{command}\": {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("PTY error: {0}")]
    Pty(String),
}

impl DriverError {
    /// Code carried by the `Error` frame for this failure
    pub fn error_code(&self) -> ErrorCode {
        match self {
            DriverError::CommandNotFound(_) => ErrorCode::CommandNotFound,
            DriverError::Spawn { .. } | DriverError::Pty(_) => ErrorCode::Internal,
        }
    }

    pub(crate) fn spawn(command: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            DriverError::CommandNotFound(command.to_string())
        } else {
            DriverError::Spawn {
                command: command.to_string(),
                source,
            }
        }
    }
}

/// Something that can run an exec command inside a task
pub trait TaskDriver {
    /// Driver name as advertised by the node
    fn name(&self) -> &'static str;

    /// Start `spec.command`; must be called from within a tokio runtime
    fn start(&self, spec: &ExecSpec) -> Result<ExecHandle, DriverError>;
}

/// Per-task driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum TaskConfig {
    MockDriver(MockConfig),
    RawExec(RawExecConfig),
}

impl TaskConfig {
    pub fn driver(&self) -> &dyn TaskDriver {
        match self {
            TaskConfig::MockDriver(config) => config,
            TaskConfig::RawExec(config) => config,
        }
    }
}

impl From<MockConfig> for TaskConfig {
    fn from(config: MockConfig) -> Self {
        TaskConfig::MockDriver(config)
    }
}

impl From<RawExecConfig> for TaskConfig {
    fn from(config: RawExecConfig) -> Self {
        TaskConfig::RawExec(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_executable_maps_to_command_not_found() {
        let err = DriverError::spawn(
            "nope",
            std::io::Error::new(std::io::ErrorKind::NotFound, "No such file"),
        );
        assert!(matches!(err, DriverError::CommandNotFound(_)));
        assert_eq!(err.error_code(), ErrorCode::CommandNotFound);
        assert!(err.to_string().contains("\"nope\""));

        let err = DriverError::spawn(
            "/etc/passwd",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.error_code(), ErrorCode::Internal);
    }

    #[test]
    fn test_task_config_is_tagged_by_driver() {
        let config: TaskConfig = serde_json::from_str(
            r#"{"driver":"mock_driver","run_for":1,"exit_code":21,"stdout_string":"out"}"#,
        )
        .unwrap();
        assert_eq!(config.driver().name(), "mock_driver");
        match config {
            TaskConfig::MockDriver(mock) => {
                assert_eq!(mock.exit_code, 21);
                assert_eq!(mock.stdout_string, "out");
                assert!(mock.stderr_string.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
