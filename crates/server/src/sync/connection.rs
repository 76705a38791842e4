// Per-connection protocol handling, independent of the socket transport.

use std::collections::HashMap;
use std::sync::Arc;

use mathnote_common::change::ChangeRequest;
use mathnote_common::protocol::ws::{
    decode_client_message, ChangeOptions, ClientMessage, ProtocolError, ServerMessage, NOTEBOOK_NOT_OPEN,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::notebook::{ConnectionId, NotebookSession};
use crate::sync::state::ServerState;

/// Protocol state of one client connection. Everything it sends, including
/// records published by the sessions it subscribes to, goes through
/// `outbound`, in order.
pub struct Connection {
    id: ConnectionId,
    state: ServerState,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    open: HashMap<String, Arc<NotebookSession>>,
}

impl Connection {
    pub fn new(state: ServerState, outbound: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self { id: Uuid::new_v4(), state, outbound, open: HashMap::new() }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn open_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.open.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Decodes and handles one inbound frame. Bad frames are logged and dropped.
    pub async fn handle_raw(&mut self, raw: &[u8]) {
        match decode_client_message(raw) {
            Ok(message) => self.handle_message(message).await,
            Err(error @ ProtocolError::UnknownDiscriminant(_)) => {
                warn!(%error, "ignoring message with unknown action");
            }
            Err(error) => {
                warn!(%error, "dropping malformed message");
                self.send(ServerMessage::Error { code: error.code().into(), message: error.to_string() });
            }
        }
    }

    pub async fn handle_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::OpenNotebook { notebook_path } => self.open_notebook(notebook_path).await,
            ClientMessage::CloseNotebook { notebook_path } => self.close_notebook(&notebook_path).await,
            ClientMessage::ChangeNotebook { notebook_path, change_requests, options } => {
                self.change_notebook(&notebook_path, &change_requests, &options).await;
            }
            ClientMessage::UseTool { notebook_path, style_id, tracker } => {
                let options = ChangeOptions { tracker, want_undo: false };
                self.change_notebook(&notebook_path, &[ChangeRequest::UseTool { style_id }], &options)
                    .await;
            }
            ClientMessage::RefreshNotebook => self.refresh().await,
        }
    }

    /// Releases every subscription this connection holds.
    pub async fn shutdown(&mut self) {
        if self.open.is_empty() {
            return;
        }
        let mut registry = self.state.notebooks().write().await;
        for (path, session) in self.open.drain() {
            session.unsubscribe(self.id).await;
            registry.close(&path).await;
        }
    }

    async fn open_notebook(&mut self, path: String) {
        if let Some(session) = self.open.get(&path) {
            // Already open: resend the snapshot from the current position.
            session.subscribe(self.id, self.outbound.clone()).await;
            return;
        }

        let (session, subscribers) = {
            let mut registry = self.state.notebooks().write().await;
            match registry.open_or_create(&path) {
                Ok(session) => (session, registry.subscriber_count(&path)),
                Err(error) => {
                    info!(notebook_path = %path, %error, "rejected openNotebook");
                    self.send(ServerMessage::Error { code: NOTEBOOK_NOT_OPEN.into(), message: error.to_string() });
                    return;
                }
            }
        };

        session.subscribe(self.id, self.outbound.clone()).await;
        info!(notebook_path = %path, subscribers, "notebook opened");
        self.open.insert(path, session);
    }

    async fn close_notebook(&mut self, path: &str) {
        let Some(session) = self.open.remove(path) else {
            self.send(ServerMessage::Error {
                code: NOTEBOOK_NOT_OPEN.into(),
                message: format!("notebook `{path}` is not open on this connection"),
            });
            return;
        };

        // After this returns no record of `path` can be queued behind the reply.
        session.unsubscribe(self.id).await;
        let resident = {
            let mut registry = self.state.notebooks().write().await;
            registry.close(path).await;
            registry.paths().len()
        };
        info!(notebook_path = %path, resident, "notebook closed");
        self.send(ServerMessage::NotebookClosed { notebook_path: path.to_owned() });
    }

    async fn change_notebook(&mut self, path: &str, requests: &[ChangeRequest], options: &ChangeOptions) {
        let Some(session) = self.open.get(path) else {
            self.send(ServerMessage::ChangeFailed {
                notebook_path: path.to_owned(),
                tracker: options.tracker,
                code: NOTEBOOK_NOT_OPEN.into(),
                message: format!("notebook `{path}` is not open on this connection"),
            });
            return;
        };

        let result = session
            .apply_batch(Some(self.id), requests, options, self.state.tools(), self.state.limits())
            .await;
        if let Err(error) = result {
            info!(notebook_path = %path, tracker = ?options.tracker, code = error.code(), %error, "batch rejected");
            self.send(ServerMessage::ChangeFailed {
                notebook_path: path.to_owned(),
                tracker: options.tracker,
                code: error.code().into(),
                message: error.to_string(),
            });
        }
    }

    async fn refresh(&mut self) {
        for session in self.open.values() {
            session.subscribe(self.id, self.outbound.clone()).await;
        }
    }

    fn send(&self, message: ServerMessage) {
        // The socket task owns the receiver; if it is gone the connection is closing.
        let _ = self.outbound.send(message);
    }
}
