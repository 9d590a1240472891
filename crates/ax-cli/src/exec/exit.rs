//! Exit coordination
//!
//! Waits for the session to end one way or another and turns the result
//! into the client's exit status.

use std::time::Duration;

use ax_core::{ExitReason, ExitResult};
use ax_protocol::{ErrorCode, Message, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::exec::mux::{DrainOutcome, RunningSession};
use crate::exec::terminal::LocalSignal;

pub struct ExitCoordinator {
    /// Forward SIGINT to the remote instead of cancelling
    forward_interrupt: bool,
    /// Upper bound on waiting for the remote after a cancel
    cancel_grace: Duration,
}

impl ExitCoordinator {
    pub fn new(forward_interrupt: bool, cancel_grace: Duration) -> Self {
        Self {
            forward_interrupt,
            cancel_grace,
        }
    }

    /// Block until the session ends and report how
    pub async fn wait(self, mut session: RunningSession) -> ExitResult {
        let mut signals = session.signals.take();

        let outcome = loop {
            tokio::select! {
                biased;

                joined = &mut session.drain => {
                    break Some(joined.unwrap_or_else(|e| {
                        DrainOutcome::TransportClosed(format!("output task failed: {}", e))
                    }));
                }

                _ = session.detach.cancelled() => break None,

                signal = next_signal(&mut signals) => match signal {
                    Some(LocalSignal::Interrupt) if self.forward_interrupt => {
                        tracing::debug!("Forwarding interrupt");
                        if session
                            .outbound
                            .try_send(Message::Signal(SignalKind::Interrupt))
                            .is_err()
                        {
                            tracing::debug!("Outbound queue full, interrupt dropped");
                        }
                    }
                    Some(signal) => {
                        tracing::info!(?signal, "Cancelling session");
                        break None;
                    }
                    None => signals = None,
                },
            }
        };

        session.cancel.cancel();

        match outcome {
            Some(DrainOutcome::OutputFailed(reason)) => {
                // The remote is still producing output nobody can see
                let deadline = tokio::time::Instant::now() + self.cancel_grace;
                let RunningSession {
                    outbound,
                    mut writer,
                    ..
                } = session;
                send_cancel(outbound, &mut writer, deadline).await;
                writer.abort();
                exit_result(DrainOutcome::OutputFailed(reason))
            }
            Some(outcome) => {
                session.writer.abort();
                let result = exit_result(outcome);
                tracing::debug!(code = result.code, reason = %result.reason, "Session ended");
                result
            }
            None => self.cancel_remote(session).await,
        }
    }

    /// Ask the remote to stop, waiting at most `cancel_grace` for it
    async fn cancel_remote(&self, session: RunningSession) -> ExitResult {
        let RunningSession {
            outbound,
            mut drain,
            mut writer,
            ..
        } = session;

        let deadline = tokio::time::Instant::now() + self.cancel_grace;
        send_cancel(outbound, &mut writer, deadline).await;

        // Trailing output may still come in
        let _ = tokio::time::timeout_at(deadline, &mut drain).await;
        writer.abort();
        drain.abort();

        ExitResult::failure(ExitReason::UserCancelled, "Exec session cancelled")
    }
}

/// Queue a `Cancel` frame and let the writer flush what is queued
async fn send_cancel(
    outbound: mpsc::Sender<Message>,
    writer: &mut JoinHandle<()>,
    deadline: tokio::time::Instant,
) {
    let sent = tokio::time::timeout_at(deadline, outbound.send(Message::Cancel)).await;
    drop(outbound);
    if !matches!(sent, Ok(Ok(()))) {
        tracing::debug!("Could not queue cancel frame");
    }
    let _ = tokio::time::timeout_at(deadline, writer).await;
}

/// Map how the output drain ended to the client's exit status
pub fn exit_result(outcome: DrainOutcome) -> ExitResult {
    match outcome {
        DrainOutcome::Exited(code) => ExitResult::normal(code),
        DrainOutcome::RemoteError {
            code: ErrorCode::CommandNotFound,
            message,
        } => ExitResult::failure(ExitReason::CommandNotFound, message),
        DrainOutcome::RemoteError { code, message } => {
            ExitResult::failure(ExitReason::RemoteError, format!("{} ({:?})", message, code))
        }
        DrainOutcome::TransportClosed(reason) => {
            ExitResult::failure(ExitReason::TransportClosed, format!("Connection lost: {}", reason))
        }
        DrainOutcome::OutputFailed(reason) => ExitResult::failure(
            ExitReason::LocalOutputFailed,
            format!("Failed to write output: {}", reason),
        ),
    }
}

async fn next_signal(signals: &mut Option<mpsc::Receiver<LocalSignal>>) -> Option<LocalSignal> {
    match signals {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
