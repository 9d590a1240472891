//! Per-connection request handling
//!
//! A connection speaks JSON lines until an `Exec` request is accepted;
//! from then on it carries exec frames for that one session.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use futures::SinkExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};

use ax_core::api::{to_line, ApiError, ApiErrorKind, ApiRequest, ApiResponse, ExecSpec};
use ax_protocol::{Frame, FrameCodec, Message, PROTOCOL_VERSION};

use crate::driver::TaskConfig;
use crate::session::{ExecSession, SessionGuard, SessionInfo};
use crate::state::ServerState;

pub(crate) async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<ApiRequest>(trimmed) {
            Ok(request) => request,
            Err(e) => {
                let error = ApiError::new(ApiErrorKind::InvalidRequest, format!("Invalid request: {}", e));
                write_response(&mut writer, &ApiResponse::Error(error)).await?;
                continue;
            }
        };

        let spec = match request {
            ApiRequest::Exec(spec) => spec,
            other => {
                write_response(&mut writer, &handle_request(other, &state)).await?;
                continue;
            }
        };

        match prepare_exec(&state, &spec) {
            Ok((driver, guard)) => {
                let started = ApiResponse::ExecStarted {
                    session_id: guard.id(),
                };
                write_response(&mut writer, &started).await?;
                // Bytes already buffered after the request line belong to the frame stream
                return run_exec(&state, spec, driver, guard, reader, writer).await;
            }
            Err(error) => {
                tracing::info!(alloc = %spec.alloc_id, "Exec rejected: {}", error);
                write_response(&mut writer, &ApiResponse::Error(error)).await?;
            }
        }
    }
}

/// Answer a listing request
pub fn handle_request(request: ApiRequest, state: &ServerState) -> ApiResponse {
    match request {
        ApiRequest::Ping => ApiResponse::Pong,
        ApiRequest::ListAllocations { prefix } => ApiResponse::Allocations {
            allocations: state.list_allocations(prefix.as_deref()),
        },
        ApiRequest::GetAllocation { alloc_id } => match state.get_allocation(&alloc_id) {
            Some(allocation) => ApiResponse::Allocation { allocation },
            None => ApiResponse::Error(ApiError::new(
                ApiErrorKind::NotFound,
                format!("Unknown allocation \"{}\"", alloc_id),
            )),
        },
        ApiRequest::ListNodes => ApiResponse::Nodes {
            nodes: vec![state.node()],
        },
        ApiRequest::Exec(_) => ApiResponse::Error(ApiError::new(
            ApiErrorKind::InvalidRequest,
            "exec requests need a dedicated connection",
        )),
    }
}

fn prepare_exec(state: &ServerState, spec: &ExecSpec) -> Result<(TaskConfig, SessionGuard), ApiError> {
    if major(&spec.version) != major(PROTOCOL_VERSION) {
        return Err(ApiError::new(
            ApiErrorKind::InvalidRequest,
            format!(
                "Unsupported protocol version {} (server speaks {})",
                spec.version, PROTOCOL_VERSION
            ),
        ));
    }
    if spec.command.first().map_or(true, |c| c.is_empty()) {
        return Err(ApiError::new(ApiErrorKind::InvalidRequest, "A command is required"));
    }

    let driver = state.exec_target(&spec.alloc_id, &spec.task)?;
    let guard = state
        .sessions
        .register(SessionInfo {
            alloc_id: spec.alloc_id.clone(),
            task: spec.task.clone(),
            command: spec.command.clone(),
            started_at: Instant::now(),
        })
        .map_err(|e| ApiError::new(ApiErrorKind::Internal, e.to_string()))?;

    Ok((driver, guard))
}

fn major(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

async fn run_exec(
    state: &ServerState,
    spec: ExecSpec,
    driver: TaskConfig,
    guard: SessionGuard,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
) -> Result<()> {
    let id = guard.id();
    tracing::info!(
        session = %id,
        alloc = %spec.alloc_id,
        task = %spec.task,
        tty = spec.tty,
        driver = driver.driver().name(),
        "Starting exec session"
    );

    let inbound = FramedRead::new(reader, FrameCodec::new());
    let mut outbound = FramedWrite::new(writer, FrameCodec::new());

    let handle = match driver.driver().start(&spec) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::info!(session = %id, "Failed to start command: {}", e);
            let message = Message::error(e.error_code(), e.to_string());
            outbound
                .send(Frame::new(id, message))
                .await
                .context("Failed to report exec failure")?;
            return Ok(());
        }
    };

    ExecSession::new(
        id,
        state.config.heartbeat_interval,
        state.config.heartbeat_timeout,
    )
    .run(inbound, outbound, handle)
    .await
    .context("Exec session failed")?;
    Ok(())
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &ApiResponse) -> Result<()> {
    let line = to_line(response)?;
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}
