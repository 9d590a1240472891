//! Raw process driver
//!
//! Runs the command directly on the host. Without a TTY the process gets
//! plain pipes; with a TTY it runs under a pseudo-terminal (see `pty`).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;

use ax_core::api::ExecSpec;

use super::{
    channels, DriverError, DriverInput, DriverOutput, ExecHandle, TaskDriver, OUTPUT_DRAIN_GRACE,
};

pub(super) const DRIVER_NAME: &str = "raw_exec";

/// Read buffer for process output
const READ_CHUNK: usize = 8192;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawExecConfig {
    /// Extra environment for exec'd commands
    pub env: BTreeMap<String, String>,
    /// Working directory; inherits the server's when unset
    pub cwd: Option<PathBuf>,
}

impl TaskDriver for RawExecConfig {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn start(&self, spec: &ExecSpec) -> Result<ExecHandle, DriverError> {
        let program = spec
            .command
            .first()
            .ok_or_else(|| DriverError::CommandNotFound(String::new()))?;

        if spec.tty {
            return super::pty::start(self, spec);
        }

        let mut cmd = Command::new(program);
        cmd.args(&spec.command[1..])
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| DriverError::spawn(program, e))?;
        tracing::info!(pid = ?child.id(), command = ?spec.command, "Spawned process");

        let (handle, driver) = channels();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let kill = driver.kill.clone();
        tokio::spawn(forward_input(driver.input, stdin, kill));

        let output = driver.output;
        let kill = driver.kill;
        tokio::spawn(async move {
            let wait = async {
                tokio::select! {
                    status = child.wait() => status,
                    _ = kill.cancelled() => {
                        tracing::debug!("Killing process");
                        let _ = child.start_kill();
                        child.wait().await
                    }
                }
            };

            let mut stdout_task = tokio::spawn(pump(stdout, output.clone(), DriverOutput::Stdout));
            let mut stderr_task = tokio::spawn(pump(stderr, output.clone(), DriverOutput::Stderr));
            let status = wait.await;

            // Both pipes drain before the exit status is reported, unless
            // something the process left behind still holds them open
            let drained = async {
                let _ = tokio::join!(&mut stdout_task, &mut stderr_task);
            };
            if tokio::time::timeout(OUTPUT_DRAIN_GRACE, drained).await.is_err() {
                tracing::debug!("Output still open after exit, not waiting for it");
                stdout_task.abort();
                stderr_task.abort();
            }

            let code = match status {
                Ok(status) => exit_code(status),
                Err(e) => {
                    tracing::warn!("Failed to wait for process: {}", e);
                    -1
                }
            };
            tracing::info!(code, "Process exited");
            let _ = output.send(DriverOutput::Exited(code)).await;
        });

        Ok(handle)
    }
}

/// Feed session input to the child's stdin.
///
/// Pipes cannot carry signals, so any forwarded signal stops the process.
async fn forward_input(
    mut input: mpsc::Receiver<DriverInput>,
    mut stdin: Option<ChildStdin>,
    kill: tokio_util::sync::CancellationToken,
) {
    while let Some(message) = input.recv().await {
        match message {
            DriverInput::Stdin(data) => {
                if let Some(pipe) = stdin.as_mut() {
                    if let Err(e) = pipe.write_all(&data).await {
                        tracing::debug!("stdin closed by process: {}", e);
                        stdin = None;
                    }
                }
            }
            DriverInput::StdinClose => {
                if let Some(mut pipe) = stdin.take() {
                    let _ = pipe.shutdown().await;
                }
            }
            DriverInput::Resize(_) => {}
            DriverInput::Signal(kind) => {
                tracing::debug!(?kind, "Signal on piped process, stopping it");
                kill.cancel();
            }
        }
    }
}

/// Copy one output pipe into the output channel until EOF
async fn pump<R>(
    reader: Option<R>,
    output: mpsc::Sender<DriverOutput>,
    wrap: fn(Bytes) -> DriverOutput,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if output.send(wrap(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("Output pipe read failed: {}", e);
                break;
            }
        }
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    use ax_protocol::TerminalSize;

    fn spec(command: &[&str]) -> ExecSpec {
        ExecSpec {
            alloc_id: "abcd".into(),
            task: "web".into(),
            command: command.iter().map(|s| s.to_string()).collect(),
            tty: false,
            size: TerminalSize::default(),
            version: ax_protocol::PROTOCOL_VERSION.into(),
        }
    }

    async fn drain(handle: &mut ExecHandle) -> (Vec<u8>, Vec<u8>, i32) {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        while let Some(item) = handle.output.recv().await {
            match item {
                DriverOutput::Stdout(b) => out.extend_from_slice(&b),
                DriverOutput::Stderr(b) => err.extend_from_slice(&b),
                DriverOutput::Exited(code) => return (out, err, code),
            }
        }
        panic!("driver ended without exit status");
    }

    #[tokio::test]
    async fn test_exit_code_and_streams() {
        let mut handle = RawExecConfig::default()
            .start(&spec(&["/bin/sh", "-c", "echo out; echo err >&2; exit 3"]))
            .unwrap();
        let (out, err, code) = drain(&mut handle).await;
        assert_eq!(out, b"out\n");
        assert_eq!(err, b"err\n");
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn test_stdin_is_echoed_by_cat() {
        let mut handle = RawExecConfig::default().start(&spec(&["cat"])).unwrap();
        for chunk in ["hello ", "from ", "stdin"] {
            handle
                .input
                .send(DriverInput::Stdin(Bytes::from(chunk)))
                .await
                .unwrap();
        }
        handle.input.send(DriverInput::StdinClose).await.unwrap();

        let (out, _, code) = drain(&mut handle).await;
        assert_eq!(out, b"hello from stdin");
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let err = RawExecConfig::default()
            .start(&spec(&["/definitely/not/here"]))
            .err()
            .unwrap();
        assert!(matches!(err, DriverError::CommandNotFound(_)));
    }

    #[tokio::test]
    async fn test_kill_reports_signal_exit() {
        let mut handle = RawExecConfig::default()
            .start(&spec(&["sleep", "30"]))
            .unwrap();
        handle.kill.cancel();
        let (_, _, code) = drain(&mut handle).await;
        assert_eq!(code, 128 + 9);
    }

    #[tokio::test]
    async fn test_exit_reported_while_background_child_holds_output() {
        let mut handle = RawExecConfig::default()
            .start(&spec(&["/bin/sh", "-c", "echo started; sleep 10 & exit 5"]))
            .unwrap();
        let (out, _, code) = tokio::time::timeout(Duration::from_secs(5), drain(&mut handle))
            .await
            .unwrap();
        assert_eq!(out, b"started\n");
        assert_eq!(code, 5);
    }
}
