//! Stream multiplexer for one exec session
//!
//! A session runs a fixed set of tasks sharing one cancellation token:
//!
//! - input drain: local stdin → `Stdin` frames, then one `StdinClose`
//! - writer: the only owner of the transport's write half
//! - output drain: the only owner of the read half; writes each output
//!   frame to the local sinks before reading the next one
//! - ticker: heartbeats and resize forwarding
//!
//! The output drain's [`DrainOutcome`] is the session result. It is only
//! produced after every earlier output frame has been written and flushed;
//! a local write failure ends the drain instead of discarding output.

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use ax_core::time::current_time_millis;
use ax_protocol::{ErrorCode, Frame, FrameCodec, Message, SessionId, TerminalSize};

use crate::api::Transport;
use crate::exec::terminal::{EscapeFilter, LocalSignal};

/// Depth of the outbound frame queue
const OUTBOUND_CAPACITY: usize = 64;

/// Bytes read from local input per frame
const INPUT_CHUNK: usize = 4096;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Local endpoints of a session
pub struct SessionIo {
    /// Local input; `None` for non-interactive sessions
    pub stdin: Option<BoxedReader>,
    pub stdout: BoxedWriter,
    pub stderr: BoxedWriter,
    /// Terminal size changes to forward
    pub resize: Option<mpsc::Receiver<TerminalSize>>,
    /// Signals delivered to the client process
    pub signals: Option<mpsc::Receiver<LocalSignal>>,
    /// Detach sequence recognition, TTY sessions only
    pub escape: Option<EscapeFilter>,
}

impl SessionIo {
    /// Session without input, writing to the given sinks
    pub fn new(stdout: BoxedWriter, stderr: BoxedWriter) -> Self {
        Self {
            stdin: None,
            stdout,
            stderr,
            resize: None,
            signals: None,
            escape: None,
        }
    }

    pub fn with_stdin(mut self, stdin: BoxedReader) -> Self {
        self.stdin = Some(stdin);
        self
    }

    pub fn with_resize(mut self, resize: mpsc::Receiver<TerminalSize>) -> Self {
        self.resize = Some(resize);
        self
    }

    pub fn with_signals(mut self, signals: mpsc::Receiver<LocalSignal>) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn with_escape(mut self, escape: Option<EscapeFilter>) -> Self {
        self.escape = escape;
        self
    }
}

/// Timing for a session
#[derive(Debug, Clone, Copy)]
pub struct MuxConfig {
    pub heartbeat_interval: Duration,
    /// Inbound silence longer than this ends the session
    pub heartbeat_timeout: Duration,
}

impl From<&ax_core::config::ClientConfig> for MuxConfig {
    fn from(config: &ax_core::config::ClientConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval,
            heartbeat_timeout: config.heartbeat_timeout,
        }
    }
}

/// How the output drain ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The remote sent `ExitStatus`
    Exited(i32),
    /// The remote sent `Error`
    RemoteError { code: ErrorCode, message: String },
    /// Frames stopped without an exit status
    TransportClosed(String),
    /// Output arrived but could not be written locally
    OutputFailed(String),
}

/// Handles to a started session
pub struct RunningSession {
    pub session_id: SessionId,
    /// Outbound frame queue feeding the writer
    pub outbound: mpsc::Sender<Message>,
    pub drain: JoinHandle<DrainOutcome>,
    pub writer: JoinHandle<()>,
    /// Stops input and ticker tasks
    pub cancel: CancellationToken,
    /// Fired by the input drain when the user typed the detach sequence
    pub detach: CancellationToken,
    pub signals: Option<mpsc::Receiver<LocalSignal>>,
}

/// Start the session tasks on `transport`
pub fn start<R, W>(transport: Transport<R, W>, io: SessionIo, config: MuxConfig) -> RunningSession
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let Transport {
        session_id,
        frames,
        sink,
    } = transport;
    let SessionIo {
        stdin,
        stdout,
        stderr,
        resize,
        signals,
        escape,
    } = io;

    let cancel = CancellationToken::new();
    let detach = CancellationToken::new();
    let write_failed = CancellationToken::new();
    let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

    let writer = tokio::spawn(run_writer(session_id, sink, outbound_rx, write_failed.clone()));

    let drain = tokio::spawn(drain_output(
        frames,
        stdout,
        stderr,
        config.heartbeat_timeout,
        write_failed,
    ));

    match stdin {
        Some(stdin) => {
            tokio::spawn(drain_input(
                stdin,
                outbound.clone(),
                escape,
                cancel.clone(),
                detach.clone(),
            ));
        }
        None => {
            // Non-interactive: input is closed from the start
            let _ = outbound.try_send(Message::StdinClose);
        }
    }

    tokio::spawn(run_ticker(
        outbound.clone(),
        config.heartbeat_interval,
        resize,
        cancel.clone(),
    ));

    RunningSession {
        session_id,
        outbound,
        drain,
        writer,
        cancel,
        detach,
        signals,
    }
}

async fn run_writer<W>(
    session_id: SessionId,
    mut sink: FramedWrite<W, FrameCodec>,
    mut outbound: mpsc::Receiver<Message>,
    write_failed: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        tracing::trace!(kind = ?message.message_type(), "Sending frame");
        if let Err(e) = sink.send(Frame::new(session_id, message)).await {
            tracing::debug!("Transport write failed: {}", e);
            write_failed.cancel();
            return;
        }
    }
}

/// The only reader of the transport
async fn drain_output<R>(
    mut frames: FramedRead<R, FrameCodec>,
    mut stdout: BoxedWriter,
    mut stderr: BoxedWriter,
    heartbeat_timeout: Duration,
    write_failed: CancellationToken,
) -> DrainOutcome
where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            next = tokio::time::timeout(heartbeat_timeout, frames.next()) => next,
            _ = write_failed.cancelled() => {
                return DrainOutcome::TransportClosed("failed to write to the session transport".into());
            }
        };

        let frame = match next {
            Err(_) => {
                return DrainOutcome::TransportClosed(format!(
                    "no response from the remote for {:?}",
                    heartbeat_timeout
                ))
            }
            Ok(None) => {
                return DrainOutcome::TransportClosed("connection closed by the remote".into())
            }
            Ok(Some(Err(e))) => return DrainOutcome::TransportClosed(format!("invalid frame: {}", e)),
            Ok(Some(Ok(frame))) => frame,
        };

        match frame.message {
            Message::Stdout(data) => {
                if let Err(e) = write_sink(&mut stdout, &data).await {
                    return DrainOutcome::OutputFailed(format!("stdout: {}", e));
                }
            }
            Message::Stderr(data) => {
                if let Err(e) = write_sink(&mut stderr, &data).await {
                    return DrainOutcome::OutputFailed(format!("stderr: {}", e));
                }
            }
            Message::ExitStatus { code } => return DrainOutcome::Exited(code),
            Message::Error { code, message } => {
                return DrainOutcome::RemoteError { code, message }
            }
            Message::Heartbeat { timestamp } => {
                tracing::trace!(
                    lag_ms = current_time_millis().saturating_sub(timestamp),
                    "Heartbeat from remote"
                );
            }
            other => {
                tracing::debug!("Ignoring {:?} from the remote", other.message_type());
            }
        }
    }
}

/// Write and flush one chunk
async fn write_sink(sink: &mut BoxedWriter, data: &[u8]) -> std::io::Result<()> {
    sink.write_all(data).await?;
    sink.flush().await
}

async fn drain_input(
    mut stdin: BoxedReader,
    outbound: mpsc::Sender<Message>,
    mut escape: Option<EscapeFilter>,
    cancel: CancellationToken,
    detach: CancellationToken,
) {
    let mut buf = vec![0u8; INPUT_CHUNK];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = stdin.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("Local input failed: {}", e);
                break;
            }
        };

        let (data, detached) = match escape.as_mut() {
            Some(filter) => {
                let filtered = filter.feed(&buf[..n]);
                (filtered.data, filtered.detach)
            }
            None => (buf[..n].to_vec(), false),
        };

        if !data.is_empty() && !send(&outbound, Message::Stdin(Bytes::from(data)), &cancel).await {
            return;
        }
        if detached {
            tracing::debug!("Detach sequence typed");
            detach.cancel();
            return;
        }
    }

    if let Some(byte) = escape.as_mut().and_then(EscapeFilter::finish) {
        let _ = send(&outbound, Message::Stdin(Bytes::copy_from_slice(&[byte])), &cancel).await;
    }
    tracing::debug!("Local input closed");
    let _ = send(&outbound, Message::StdinClose, &cancel).await;
}

/// Queue a frame; false if the session is going away
async fn send(outbound: &mpsc::Sender<Message>, message: Message, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = outbound.send(message) => sent.is_ok(),
    }
}

async fn run_ticker(
    outbound: mpsc::Sender<Message>,
    heartbeat_interval: Duration,
    mut resize: Option<mpsc::Receiver<TerminalSize>>,
    cancel: CancellationToken,
) {
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,

            _ = heartbeat.tick() => {
                let timestamp = current_time_millis();
                if let Err(mpsc::error::TrySendError::Closed(_)) =
                    outbound.try_send(Message::Heartbeat { timestamp })
                {
                    return;
                }
            }

            size = next_size(&mut resize) => match size {
                Some(size) => match outbound.try_send(Message::Resize(size)) {
                    Ok(()) => tracing::debug!("Forwarded resize to {}x{}", size.cols, size.rows),
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!("Outbound queue full, dropping resize");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                },
                None => resize = None,
            },
        }
    }
}

async fn next_size(resize: &mut Option<mpsc::Receiver<TerminalSize>>) -> Option<TerminalSize> {
    match resize {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
