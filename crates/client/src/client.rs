use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mathnote_common::change::ChangeRequest;
use mathnote_common::model::StyleId;
use mathnote_common::protocol::ws::{ChangeOptions, ClientMessage, ServerMessage};
use mathnote_common::store::EntityStore;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::channel::{Channel, ChannelState};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::mirror::{MirrorRegistry, MirrorUpdate, NotebookWatcher};
use crate::tracker::{TrackedChangeCoordinator, TrackedChanges};

/// A connected notebook client: channel, mirrors and tracked-change
/// coordinator behind one handle.
pub struct NotebookClient {
    channel: Channel,
    mirrors: Arc<Mutex<MirrorRegistry>>,
    coordinator: TrackedChangeCoordinator,
    snapshots: watch::Receiver<u64>,
    request_timeout: Duration,
    reader: Option<JoinHandle<()>>,
}

impl NotebookClient {
    /// Connects and opens every notebook listed in `config`.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let (channel, inbound) = Channel::connect(&config.server_url).await?;
        let mirrors = Arc::new(Mutex::new(MirrorRegistry::new()));
        let coordinator = TrackedChangeCoordinator::new();
        let (snapshots_tx, snapshots) = watch::channel(0_u64);

        let reader = tokio::spawn(read_loop(
            inbound,
            channel.clone(),
            Arc::clone(&mirrors),
            coordinator.clone(),
            snapshots_tx,
        ));

        let client = Self {
            channel,
            mirrors,
            coordinator,
            snapshots,
            request_timeout: config.request_timeout(),
            reader: Some(reader),
        };
        for path in &config.open_notebooks {
            client.open_notebook(path)?;
        }
        Ok(client)
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn open_notebook(&self, path: &str) -> Result<(), ClientError> {
        self.channel.send(&ClientMessage::OpenNotebook { notebook_path: path.to_owned() })
    }

    pub fn close_notebook(&self, path: &str) -> Result<(), ClientError> {
        self.channel.send(&ClientMessage::CloseNotebook { notebook_path: path.to_owned() })
    }

    /// Asks the server to resend snapshots for every open notebook.
    pub fn refresh(&self) -> Result<(), ClientError> {
        self.channel.send(&ClientMessage::RefreshNotebook)
    }

    /// Waits until a snapshot for `path` has been mirrored.
    pub async fn wait_for_notebook(&self, path: &str, timeout: Duration) -> Result<(), ClientError> {
        let mut snapshots = self.snapshots.clone();
        let wait = async {
            loop {
                if self.lock_mirrors().is_open(path) {
                    return Ok(());
                }
                if snapshots.changed().await.is_err() {
                    return Err(ClientError::ChannelClosed);
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.map_err(|_| ClientError::WaitTimeout(timeout))?
    }

    pub fn watch(&self, path: &str, watcher: Arc<dyn NotebookWatcher>) {
        self.lock_mirrors().watch(path, watcher);
    }

    /// Runs `f` against the mirror of `path`, if it is open.
    pub fn with_store<R>(&self, path: &str, f: impl FnOnce(&EntityStore) -> R) -> Option<R> {
        let mirrors = self.lock_mirrors();
        mirrors.get(path).filter(|controller| controller.is_open()).map(|controller| f(controller.store()))
    }

    /// Submits `requests` without tracking. Results arrive through the mirror.
    pub fn send_changes(&self, path: &str, requests: Vec<ChangeRequest>) -> Result<(), ClientError> {
        self.channel.send(&ClientMessage::ChangeNotebook {
            notebook_path: path.to_owned(),
            change_requests: requests,
            options: ChangeOptions::default(),
        })
    }

    /// Submits `requests` and resolves with every record they produced plus
    /// the undo requests, once the server marks the batch complete.
    pub async fn send_tracked(
        &self,
        path: &str,
        requests: Vec<ChangeRequest>,
        timeout: Duration,
    ) -> Result<TrackedChanges, ClientError> {
        let batch = self.coordinator.register(path);
        let message = ClientMessage::ChangeNotebook {
            notebook_path: path.to_owned(),
            change_requests: requests,
            options: ChangeOptions { tracker: Some(batch.tracker()), want_undo: true },
        };
        if let Err(error) = self.channel.send(&message) {
            batch.cancel();
            return Err(error);
        }
        batch.wait(timeout).await
    }

    pub async fn use_tool_tracked(
        &self,
        path: &str,
        style_id: StyleId,
        timeout: Duration,
    ) -> Result<TrackedChanges, ClientError> {
        let batch = self.coordinator.register(path);
        let message = ClientMessage::UseTool {
            notebook_path: path.to_owned(),
            style_id,
            tracker: Some(batch.tracker()),
        };
        if let Err(error) = self.channel.send(&message) {
            batch.cancel();
            return Err(error);
        }
        batch.wait(timeout).await
    }

    pub fn pending_requests(&self) -> usize {
        self.coordinator.pending_count()
    }

    /// Closes the channel and waits for the reader to drain.
    pub async fn close(mut self) {
        self.channel.close();
        self.channel.closed().await;
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
    }

    fn lock_mirrors(&self) -> MutexGuard<'_, MirrorRegistry> {
        self.mirrors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for NotebookClient {
    fn drop(&mut self) {
        self.channel.close();
    }
}

/// Applies each inbound message to the mirror first, then to the coordinator,
/// so a resolved batch is already visible in the mirror.
async fn read_loop(
    mut inbound: mpsc::UnboundedReceiver<ServerMessage>,
    channel: Channel,
    mirrors: Arc<Mutex<MirrorRegistry>>,
    coordinator: TrackedChangeCoordinator,
    snapshots: watch::Sender<u64>,
) {
    while let Some(message) = inbound.recv().await {
        let update = mirrors.lock().unwrap_or_else(PoisonError::into_inner).handle_message(&message);
        match update {
            MirrorUpdate::Diverged { notebook_path, .. } => {
                if let Err(error) = channel.send(&ClientMessage::OpenNotebook { notebook_path }) {
                    warn!(%error, "failed to request resync");
                }
            }
            MirrorUpdate::Applied | MirrorUpdate::Ignored => {}
        }

        match &message {
            ServerMessage::NotebookOpened { .. } => {
                snapshots.send_modify(|count| *count += 1);
            }
            ServerMessage::Error { code, message } => {
                warn!(%code, %message, "server reported an error");
            }
            _ => {}
        }

        coordinator.handle_message(&message);
    }

    mirrors.lock().unwrap_or_else(PoisonError::into_inner).close_all();
    info!("notebook client disconnected");
}
