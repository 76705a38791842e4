use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::sync::ws::serve_until_shutdown;
use crate::sync::ServerState;

/// A server running on a background task. Dropping the handle shuts it down.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `ws://` URL of the notebook endpoint.
    pub fn notebook_url(&self) -> String {
        format!("ws://{}{}", self.local_addr, crate::sync::ws::NOTEBOOK_WS_PATH)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub async fn wait(mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub async fn start(config: ServerConfig) -> Result<ServerHandle> {
    let state = ServerState::new(&config);
    start_with_state(&config.listen_addr, state).await
}

pub async fn start_with_state(listen_addr: &str, state: ServerState) -> Result<ServerHandle> {
    let listener = bind(listen_addr).await?;
    let local_addr = listener.local_addr().context("failed to read bound address")?;

    let tools = state.tools().names().join(",");

    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    let task = tokio::spawn(async move {
        if let Err(error) = serve_until_shutdown(listener, state, shutdown_rx).await {
            warn!(?error, "notebook server terminated unexpectedly");
        }
    });

    info!(%local_addr, %tools, "notebook server started");
    Ok(ServerHandle { local_addr, shutdown_tx, task: Some(task) })
}

pub async fn run_standalone(config: ServerConfig) -> Result<()> {
    let listener = bind(&config.listen_addr).await?;
    let local_addr = listener.local_addr().context("failed to read bound address")?;
    let state = ServerState::new(&config);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(());
    });

    info!(%local_addr, "standalone notebook server started");
    let result = serve_until_shutdown(listener, state, shutdown_rx).await;
    info!("standalone notebook server stopped");
    result.context("standalone notebook server exited with error")
}

async fn bind(listen_addr: &str) -> Result<TcpListener> {
    TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind notebook server to `{listen_addr}`"))
}
