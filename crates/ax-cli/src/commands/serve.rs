//! `allocx serve`: run the development control plane

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use ax_core::config::ServerConfig;
use ax_server::seed::{demo_allocations, load_allocations};
use ax_server::{Server, ServerState};

use crate::output::{format_allocations, format_node, print_info};

/// Serve until Ctrl+C or SIGTERM
pub async fn serve_command(
    mut config: ServerConfig,
    bind_override: Option<String>,
    allocations_path: Option<PathBuf>,
) -> Result<()> {
    if let Some(bind) = bind_override {
        config.bind_address = bind;
    }

    let allocations = match allocations_path {
        Some(path) => load_allocations(&path)?,
        None => demo_allocations(),
    };

    let state = Arc::new(ServerState::new(config));
    for allocation in allocations {
        state.upsert_allocation(allocation);
    }

    let cancel = CancellationToken::new();
    spawn_shutdown_handler(cancel.clone());

    let server = Server::new(Arc::clone(&state), cancel);
    let listener = server.bind().await?;

    print_info(&format!(
        "Control plane listening on {}",
        listener.local_addr()?
    ));
    print_info(&format!("Node: {}", format_node(&state.node())));
    println!("{}", format_allocations(&state.list_allocations(None), true));

    server.serve(listener).await
}

fn spawn_shutdown_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Cannot watch SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}
