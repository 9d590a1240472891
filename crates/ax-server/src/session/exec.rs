//! Frame pump between an exec client and a running command
//!
//! Two halves run concurrently so a slow process never stops heartbeats
//! or output from reaching the client:
//!
//! - inbound: client frames → driver input (stdin, resize, signals, cancel);
//!   a client silent for longer than the idle timeout is treated as gone
//! - outbound: driver output → client frames, plus periodic heartbeats
//!
//! The outbound half is the only writer. It sends `ExitStatus` after every
//! output chunk the driver produced, and nothing after it.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use ax_core::time::current_time_millis;
use ax_protocol::{ErrorCode, Frame, FrameCodec, Message, ProtocolError, SessionId};

use crate::driver::{DriverInput, DriverOutput, ExecHandle};

/// One negotiated exec session on the control-plane side
pub struct ExecSession {
    id: SessionId,
    heartbeat_interval: Duration,
    idle_timeout: Duration,
}

impl ExecSession {
    pub fn new(id: SessionId, heartbeat_interval: Duration, idle_timeout: Duration) -> Self {
        Self {
            id,
            heartbeat_interval,
            idle_timeout,
        }
    }

    /// Pump frames until the command exits or the client goes away.
    ///
    /// Returns the exit code once `ExitStatus` was delivered.
    pub async fn run<R, W>(
        self,
        inbound: FramedRead<R, FrameCodec>,
        mut outbound: FramedWrite<W, FrameCodec>,
        handle: ExecHandle,
    ) -> Result<Option<i32>, ProtocolError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        let ExecHandle {
            input,
            mut output,
            kill,
        } = handle;
        let done = CancellationToken::new();
        let client_gone = CancellationToken::new();

        let inbound_task = tokio::spawn(forward_inbound(
            self.id,
            self.idle_timeout,
            inbound,
            input,
            kill.clone(),
            done.clone(),
            client_gone.clone(),
        ));

        // A silent client may never read again, so writes to it could block
        let result = tokio::select! {
            result = self.pump_outbound(&mut outbound, &mut output) => result,
            _ = client_gone.cancelled() => Ok(None),
        };
        done.cancel();

        if !matches!(result, Ok(Some(_))) {
            kill.cancel();
        }
        let _ = inbound_task.await;

        match &result {
            Ok(Some(code)) => tracing::info!(session = %self.id, code, "Exec session finished"),
            Ok(None) => tracing::warn!(session = %self.id, "Exec session ended without exit status"),
            Err(e) => tracing::warn!(session = %self.id, "Exec session transport failed: {}", e),
        }
        result
    }

    async fn pump_outbound<W>(
        &self,
        outbound: &mut FramedWrite<W, FrameCodec>,
        output: &mut mpsc::Receiver<DriverOutput>,
    ) -> Result<Option<i32>, ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        heartbeat.tick().await;

        loop {
            tokio::select! {
                biased;

                item = output.recv() => {
                    let message = match item {
                        Some(DriverOutput::Stdout(data)) => Message::Stdout(data),
                        Some(DriverOutput::Stderr(data)) => Message::Stderr(data),
                        Some(DriverOutput::Exited(code)) => {
                            outbound.send(Frame::new(self.id, Message::ExitStatus { code })).await?;
                            return Ok(Some(code));
                        }
                        None => {
                            outbound
                                .send(Frame::new(
                                    self.id,
                                    Message::error(ErrorCode::Internal, "driver stopped without an exit status"),
                                ))
                                .await?;
                            return Ok(None);
                        }
                    };
                    outbound.send(Frame::new(self.id, message)).await?;
                }

                _ = heartbeat.tick() => {
                    let timestamp = current_time_millis();
                    outbound.send(Frame::new(self.id, Message::Heartbeat { timestamp })).await?;
                }
            }
        }
    }
}

async fn forward_inbound<R>(
    id: SessionId,
    idle_timeout: Duration,
    mut inbound: FramedRead<R, FrameCodec>,
    input: mpsc::Sender<DriverInput>,
    kill: CancellationToken,
    done: CancellationToken,
    client_gone: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = done.cancelled() => return,
            frame = tokio::time::timeout(idle_timeout, inbound.next()) => match frame {
                Ok(frame) => frame,
                Err(_) => {
                    tracing::warn!(
                        session = %id,
                        "No frames from client for {:?}, stopping",
                        idle_timeout
                    );
                    kill.cancel();
                    client_gone.cancel();
                    return;
                }
            },
        };

        let message = match frame {
            Some(Ok(frame)) => {
                if frame.session_id != id {
                    tracing::warn!(session = %id, "Dropping frame for foreign session {}", frame.session_id);
                    continue;
                }
                frame.message
            }
            Some(Err(e)) => {
                tracing::warn!(session = %id, "Bad frame from client: {}", e);
                kill.cancel();
                return;
            }
            None => {
                tracing::debug!(session = %id, "Client disconnected");
                kill.cancel();
                return;
            }
        };

        let forwarded = match message {
            Message::Stdin(data) => DriverInput::Stdin(data),
            Message::StdinClose => DriverInput::StdinClose,
            Message::Resize(size) => DriverInput::Resize(size),
            Message::Signal(kind) => DriverInput::Signal(kind),
            Message::Heartbeat { .. } => continue,
            Message::Cancel => {
                tracing::info!(session = %id, "Client cancelled the session");
                kill.cancel();
                continue;
            }
            other => {
                tracing::warn!(session = %id, "Unexpected {:?} from client", other.message_type());
                continue;
            }
        };

        tokio::select! {
            _ = done.cancelled() => return,
            sent = input.send(forwarded) => {
                if sent.is_err() {
                    tracing::trace!(session = %id, "Driver no longer takes input");
                }
            }
        }
    }
}
