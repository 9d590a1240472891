//! API listener
//!
//! Accepts incoming connections and spawns a handler for each client.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use ax_core::NodeStatus;

use crate::server::handler::handle_connection;
use crate::state::ServerState;

/// Development control plane listening for API and exec connections
pub struct Server {
    state: Arc<ServerState>,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
}

impl Server {
    pub fn new(state: Arc<ServerState>, cancel: CancellationToken) -> Self {
        Self { state, cancel }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let address = &self.state.config.bind_address;
        TcpListener::bind(address)
            .await
            .with_context(|| format!("Failed to bind to {}", address))
    }

    /// Bind and serve until cancelled
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("Control plane listening on {}", local_addr);
        self.state.set_node_status(NodeStatus::Ready);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Control plane shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        self.state.set_node_status(NodeStatus::Down);
        Ok(())
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        tracing::debug!("New connection from {}", peer_addr);

        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Connection handler cancelled for {}", peer_addr);
                    return;
                }
                result = handle_connection(socket, state) => result
            };

            match result {
                Ok(()) => tracing::debug!("Connection from {} closed", peer_addr),
                Err(e) => tracing::warn!("Connection from {} closed with error: {:#}", peer_addr, e),
            }
        });
    }
}
