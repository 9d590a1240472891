//! PTY-backed process execution for TTY sessions
//!
//! portable-pty handles are blocking, so the reader, the input side and
//! the child wait each run on the blocking pool.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ax_core::api::ExecSpec;
use ax_protocol::{SignalKind, TerminalSize};

use super::{
    channels, DriverError, DriverInput, DriverOutput, ExecHandle, RawExecConfig, OUTPUT_DRAIN_GRACE,
};

const READ_CHUNK: usize = 4096;

/// VEOF, ends input for a canonical-mode reader
const EOT: u8 = 0x04;

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Locate `program` the way a shell would, honouring the task's PATH override
fn find_executable(program: &str, config: &RawExecConfig) -> Option<PathBuf> {
    if program.contains('/') {
        let path = Path::new(program);
        let path = match &config.cwd {
            Some(cwd) if path.is_relative() => cwd.join(path),
            _ => path.to_path_buf(),
        };
        return path.is_file().then_some(path);
    }

    let search = config
        .env
        .get("PATH")
        .cloned()
        .or_else(|| std::env::var("PATH").ok())?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

pub(super) fn start(config: &RawExecConfig, spec: &ExecSpec) -> Result<ExecHandle, DriverError> {
    let program = spec
        .command
        .first()
        .ok_or_else(|| DriverError::CommandNotFound(String::new()))?;
    let resolved = find_executable(program, config)
        .ok_or_else(|| DriverError::CommandNotFound(program.clone()))?;

    tracing::info!(
        command = ?spec.command,
        "Opening PTY {}x{}",
        spec.size.cols,
        spec.size.rows
    );

    let pair = native_pty_system()
        .openpty(pty_size(spec.size))
        .map_err(|e| DriverError::Pty(format!("Failed to open PTY: {}", e)))?;

    let mut cmd = CommandBuilder::new(&resolved);
    cmd.args(&spec.command[1..]);
    cmd.env("TERM", "xterm-256color");
    for (key, value) in &config.env {
        cmd.env(key, value);
    }
    if let Some(cwd) = &config.cwd {
        cmd.cwd(cwd);
    }

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| DriverError::Pty(format!("Failed to spawn {}: {}", program, e)))?;
    // The master only sees EOF once no slave handle is left open
    drop(pair.slave);
    tracing::info!(pid = ?child.process_id(), "Spawned PTY process");

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| DriverError::Pty(format!("Failed to clone PTY reader: {}", e)))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| DriverError::Pty(format!("Failed to take PTY writer: {}", e)))?;
    let mut killer = child.clone_killer();

    let (handle, driver) = channels();
    let output = driver.output;
    let kill = driver.kill;
    let exited = CancellationToken::new();

    let master = pair.master;
    let input = driver.input;
    let input_kill = kill.clone();
    tokio::task::spawn_blocking(move || forward_input(input, master, writer, input_kill));

    let watcher_exited = exited.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = kill.cancelled() => {
                tracing::debug!("Killing PTY process");
                if let Err(e) = killer.kill() {
                    tracing::debug!("Kill failed: {}", e);
                }
            }
            _ = watcher_exited.cancelled() => {}
        }
    });

    tokio::spawn(async move {
        let reader_output = output.clone();
        let read_task = tokio::task::spawn_blocking(move || read_output(reader, reader_output));
        let status = tokio::task::spawn_blocking(move || child.wait()).await;
        exited.cancel();
        // A background process may keep the PTY open indefinitely
        if tokio::time::timeout(OUTPUT_DRAIN_GRACE, read_task).await.is_err() {
            tracing::debug!("PTY still open after exit, not waiting for it");
        }

        let code = match status {
            Ok(Ok(status)) => status.exit_code() as i32,
            Ok(Err(e)) => {
                tracing::warn!("Failed to wait for PTY process: {}", e);
                -1
            }
            Err(e) => {
                tracing::warn!("PTY wait task failed: {}", e);
                -1
            }
        };
        tracing::info!(code, "PTY process exited");
        let _ = output.send(DriverOutput::Exited(code)).await;
    });

    Ok(handle)
}

fn read_output(mut reader: Box<dyn Read + Send>, output: mpsc::Sender<DriverOutput>) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if output.blocking_send(DriverOutput::Stdout(chunk)).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            // EIO once the child side is gone
            Err(_) => break,
        }
    }
}

/// Apply session input to the PTY master.
///
/// Interrupt and quit go through the line discipline so they reach the
/// foreground process group; terminate stops the child.
fn forward_input(
    mut input: mpsc::Receiver<DriverInput>,
    master: Box<dyn MasterPty + Send>,
    mut writer: Box<dyn Write + Send>,
    kill: CancellationToken,
) {
    while let Some(message) = input.blocking_recv() {
        let result = match message {
            DriverInput::Stdin(data) => writer.write_all(&data).and_then(|_| writer.flush()),
            DriverInput::StdinClose => writer.write_all(&[EOT]).and_then(|_| writer.flush()),
            DriverInput::Resize(size) => {
                tracing::debug!("Resizing PTY to {}x{}", size.cols, size.rows);
                if let Err(e) = master.resize(pty_size(size)) {
                    tracing::debug!("PTY resize failed: {}", e);
                }
                Ok(())
            }
            DriverInput::Signal(SignalKind::Interrupt) => writer.write_all(&[0x03]).and_then(|_| writer.flush()),
            DriverInput::Signal(SignalKind::Quit) => writer.write_all(&[0x1c]).and_then(|_| writer.flush()),
            DriverInput::Signal(SignalKind::Terminate) => {
                kill.cancel();
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::debug!("PTY write failed: {}", e);
            break;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::driver::TaskDriver;

    fn spec(command: &[&str]) -> ExecSpec {
        ExecSpec {
            alloc_id: "abcd".into(),
            task: "web".into(),
            command: command.iter().map(|s| s.to_string()).collect(),
            tty: true,
            size: TerminalSize::new(30, 100),
            version: ax_protocol::PROTOCOL_VERSION.into(),
        }
    }

    #[test]
    fn test_find_executable() {
        let config = RawExecConfig::default();
        assert!(find_executable("sh", &config).is_some());
        assert!(find_executable("/bin/sh", &config).is_some());
        assert!(find_executable("definitely-not-a-command-xyz", &config).is_none());
    }

    #[tokio::test]
    async fn test_missing_command_under_tty() {
        let err = RawExecConfig::default()
            .start(&spec(&["definitely-not-a-command-xyz"]))
            .err()
            .unwrap();
        assert!(matches!(err, DriverError::CommandNotFound(_)));
    }

    #[tokio::test]
    async fn test_pty_reports_size_and_exit_code() {
        let mut handle = RawExecConfig::default()
            .start(&spec(&["/bin/sh", "-c", "stty size; exit 4"]))
            .unwrap();

        let mut out = Vec::new();
        let code = loop {
            match handle.output.recv().await {
                Some(DriverOutput::Stdout(b)) => out.extend_from_slice(&b),
                Some(DriverOutput::Stderr(_)) => {}
                Some(DriverOutput::Exited(code)) => break code,
                None => panic!("driver ended without exit status"),
            }
        };
        assert_eq!(code, 4);
        assert!(String::from_utf8_lossy(&out).contains("30 100"));
    }

    #[tokio::test]
    async fn test_exit_reported_while_background_child_holds_pty() {
        let mut handle = RawExecConfig::default()
            .start(&spec(&["/bin/sh", "-c", "sleep 10 & exit 6"]))
            .unwrap();

        let code = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                match handle.output.recv().await {
                    Some(DriverOutput::Exited(code)) => break code,
                    Some(_) => {}
                    None => panic!("driver ended without exit status"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(code, 6);
    }
}
