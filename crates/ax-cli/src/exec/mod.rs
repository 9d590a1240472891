//! Exec sessions against a running allocation
//!
//! [`run_exec`] drives one session end to end: resolve the allocation,
//! optionally wait for it to run, negotiate, stream, and report the exit.

pub mod exit;
pub mod mux;
pub mod negotiate;
pub mod resolve;
pub mod terminal;

use std::time::Duration;

use ax_core::config::ClientConfig;
use ax_core::poll::{wait_for_allocation_running, PollConfig};
use ax_core::{AxError, ExecRequest, ExitResult};
use ax_protocol::TerminalSize;

use crate::api::ApiClient;
use exit::ExitCoordinator;
use mux::{MuxConfig, SessionIo};

/// Poll cadence for `--wait`
const WAIT_INTERVAL: Duration = Duration::from_millis(250);

/// What to run and where
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Allocation id or unique prefix
    pub alloc: String,
    pub task: Option<String>,
    pub command: Vec<String>,
    pub tty: bool,
    pub size: TerminalSize,
    /// Put the local terminal in raw mode while the session runs
    pub raw_terminal: bool,
    /// Wait up to this long for the allocation to be running
    pub wait: Option<Duration>,
}

impl ExecOptions {
    pub fn new(alloc: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            alloc: alloc.into(),
            task: None,
            command,
            tty: false,
            size: TerminalSize::default(),
            raw_terminal: false,
            wait: None,
        }
    }
}

/// Run one exec session to completion.
///
/// Errors cover everything up to a negotiated session; once frames flow
/// the outcome is always an [`ExitResult`].
pub async fn run_exec(
    client: &ApiClient,
    config: &ClientConfig,
    options: ExecOptions,
    io: SessionIo,
) -> Result<ExitResult, AxError> {
    ExecRequest::new(options.alloc.as_str(), options.command.clone()).validate()?;

    let mut alloc = resolve::resolve_allocation(client, &options.alloc).await?;
    tracing::debug!(alloc = %alloc.id, status = %alloc.client_status, "Resolved allocation");

    if let Some(timeout) = options.wait {
        alloc = wait_for_allocation_running(client, &alloc.id, PollConfig::new(WAIT_INTERVAL, timeout))
            .await?;
    }

    let mut request =
        ExecRequest::new(alloc.id.as_str(), options.command).with_tty(options.tty, options.size);
    if let Some(task) = options.task {
        request = request.with_task(task);
    }

    let transport = negotiate::open_session(client, &alloc, &request).await?;

    // Restored when this returns, whichever way the session ended
    let _raw = terminal::RawModeGuard::enter(options.raw_terminal);
    let session = mux::start(transport, io, MuxConfig::from(config));
    tracing::debug!(session = %session.session_id, "Session running");

    Ok(ExitCoordinator::new(options.tty, config.cancel_grace)
        .wait(session)
        .await)
}
