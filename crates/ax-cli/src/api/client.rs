//! TCP client for the control-plane API
//!
//! Every request uses a fresh connection: listing calls are one JSON line
//! each way, and an exec handshake keeps its connection for the frames
//! that follow.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};

use ax_core::api::{to_line, ApiRequest, ApiResponse, ExecSpec};
use ax_core::config::ClientConfig;
use ax_core::traits::ControlPlane;
use ax_core::{AllocationStub, ConnectionError, NodeStub, SessionError};
use ax_protocol::{FrameCodec, SessionId};

/// A negotiated exec session's transport halves
pub struct Transport<R, W> {
    pub session_id: SessionId,
    pub frames: FramedRead<R, FrameCodec>,
    pub sink: FramedWrite<W, FrameCodec>,
}

impl<R, W> Transport<R, W> {
    pub fn new(session_id: SessionId, reader: R, writer: W) -> Self
    where
        R: tokio::io::AsyncRead,
        W: tokio::io::AsyncWrite,
    {
        Self {
            session_id,
            frames: FramedRead::new(reader, FrameCodec::new()),
            sink: FramedWrite::new(writer, FrameCodec::new()),
        }
    }
}

/// Transport of a session negotiated over TCP
pub type ExecTransport = Transport<BufReader<OwnedReadHalf>, OwnedWriteHalf>;

/// Client for the control-plane API
#[derive(Debug, Clone)]
pub struct ApiClient {
    address: String,
    connect_timeout: Duration,
}

impl ApiClient {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.address.clone(), config.connect_timeout)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<TcpStream, ConnectionError> {
        tracing::debug!("Connecting to control plane at {}", self.address);

        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                Ok(stream)
            }
            Ok(Err(source)) => Err(ConnectionError::Connect {
                address: self.address.clone(),
                source,
            }),
            Err(_) => Err(ConnectionError::Timeout(self.address.clone())),
        }
    }

    /// Send one request on a fresh connection and read the response
    pub async fn request(&self, request: &ApiRequest) -> Result<ApiResponse, ConnectionError> {
        let stream = self.connect().await?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        send_line(&mut writer, request).await?;
        read_response(&mut reader).await
    }

    /// Perform the exec handshake; the connection then carries frames
    pub async fn open_exec(&self, spec: &ExecSpec) -> Result<ExecTransport, SessionError> {
        let stream = self.connect().await?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        send_line(&mut writer, &ApiRequest::Exec(spec.clone())).await?;
        match read_response(&mut reader).await? {
            ApiResponse::ExecStarted { session_id } => {
                tracing::debug!(session = %session_id, "Exec session started");
                // The reader may already hold the first frames; keep it
                Ok(Transport::new(session_id, reader, writer))
            }
            ApiResponse::Error(error) => Err(SessionError::Rejected(error)),
            other => Err(unexpected(other).into()),
        }
    }
}

#[async_trait]
impl ControlPlane for ApiClient {
    async fn list_allocations(
        &self,
        prefix: Option<&str>,
    ) -> Result<Vec<AllocationStub>, ConnectionError> {
        let request = ApiRequest::ListAllocations {
            prefix: prefix.map(str::to_string),
        };
        match self.request(&request).await? {
            ApiResponse::Allocations { allocations } => Ok(allocations),
            ApiResponse::Error(error) => Err(ConnectionError::Api(error)),
            other => Err(unexpected(other)),
        }
    }

    async fn get_allocation(&self, alloc_id: &str) -> Result<AllocationStub, ConnectionError> {
        let request = ApiRequest::GetAllocation {
            alloc_id: alloc_id.to_string(),
        };
        match self.request(&request).await? {
            ApiResponse::Allocation { allocation } => Ok(allocation),
            ApiResponse::Error(error) => Err(ConnectionError::Api(error)),
            other => Err(unexpected(other)),
        }
    }

    async fn list_nodes(&self) -> Result<Vec<NodeStub>, ConnectionError> {
        match self.request(&ApiRequest::ListNodes).await? {
            ApiResponse::Nodes { nodes } => Ok(nodes),
            ApiResponse::Error(error) => Err(ConnectionError::Api(error)),
            other => Err(unexpected(other)),
        }
    }
}

async fn send_line(writer: &mut OwnedWriteHalf, request: &ApiRequest) -> Result<(), ConnectionError> {
    let line = to_line(request).map_err(|e| ConnectionError::InvalidResponse(e.to_string()))?;
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ConnectionError::Lost(e.to_string()))
}

async fn read_response(
    reader: &mut BufReader<OwnedReadHalf>,
) -> Result<ApiResponse, ConnectionError> {
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .await
        .map_err(|e| ConnectionError::Lost(e.to_string()))?;
    if n == 0 {
        return Err(ConnectionError::Lost(
            "control plane closed the connection".into(),
        ));
    }
    serde_json::from_str(line.trim()).map_err(|e| ConnectionError::InvalidResponse(e.to_string()))
}

fn unexpected(response: ApiResponse) -> ConnectionError {
    ConnectionError::InvalidResponse(format!("unexpected response {:?}", response))
}
