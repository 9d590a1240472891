//! `allocx exec`

use std::io::IsTerminal;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use ax_core::config::ClientConfig;
use ax_core::{AxError, ExitResult, ResolveError, SessionError, MIN_PREFIX_LEN};

use crate::api::ApiClient;
use crate::exec::mux::SessionIo;
use crate::exec::terminal::{current_size, watch_signals, EscapeFilter, ResizeWatcher};
use crate::exec::{run_exec, ExecOptions};

/// Parsed `exec` arguments
#[derive(Debug, Clone)]
pub struct ExecArgs {
    pub alloc: String,
    pub command: Vec<String>,
    pub task: Option<String>,
    pub address: Option<String>,
    /// Forward local stdin
    pub interactive: bool,
    /// Request a pseudo-terminal
    pub tty: bool,
    /// `Some(None)` disables the escape sequence
    pub escape: Option<Option<char>>,
    pub wait: Option<Duration>,
}

/// Checks that need no network, in the order users hit them
pub fn check_args(args: &ExecArgs) -> Result<(), AxError> {
    if args.alloc.chars().count() < MIN_PREFIX_LEN {
        return Err(ResolveError::TooShort(args.alloc.clone()).into());
    }
    if args.command.first().map_or(true, |c| c.is_empty()) {
        return Err(SessionError::MissingCommand.into());
    }
    Ok(())
}

/// Run `exec` against the configured control plane
pub async fn exec_command(args: ExecArgs, config: ClientConfig) -> Result<ExitResult, AxError> {
    check_args(&args)?;

    let config = config.with_address_override(args.address.as_deref());
    let client = ApiClient::from_config(&config);
    tracing::debug!(address = %client.address(), "Using control plane");

    let stdin_is_terminal = std::io::stdin().is_terminal();
    let raw_terminal = args.tty && args.interactive && stdin_is_terminal;
    let escape_char = args.escape.unwrap_or(config.escape_char);

    let watchers = CancellationToken::new();
    let mut io = SessionIo::new(
        Box::new(tokio::io::stdout()),
        Box::new(tokio::io::stderr()),
    )
    .with_signals(watch_signals(watchers.clone()));

    if args.interactive {
        io = io.with_stdin(Box::new(tokio::io::stdin()));
    }
    if args.tty {
        io = io.with_resize(ResizeWatcher::spawn(watchers.clone()));
    }
    if raw_terminal {
        io = io.with_escape(escape_char.and_then(EscapeFilter::new));
    }

    let options = ExecOptions {
        alloc: args.alloc,
        task: args.task,
        command: args.command,
        tty: args.tty,
        size: if args.tty {
            current_size()
        } else {
            Default::default()
        },
        raw_terminal,
        wait: args.wait,
    };

    let result = run_exec(&client, &config, options, io).await;
    watchers.cancel();
    result
}
