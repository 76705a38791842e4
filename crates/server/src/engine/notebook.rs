use std::collections::{HashMap, HashSet};

use mathnote_common::change::{ChangeRequest, NotebookChange};
use mathnote_common::model::EntityId;
use mathnote_common::protocol::ws::{ChangeOptions, ServerMessage, BATCH_TOO_LARGE};
use mathnote_common::store::{EntityStore, StoreError};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::tools::{ToolContext, ToolError, ToolRegistry};

pub type ConnectionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_batch_requests: usize,
    pub max_changes_per_message: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_batch_requests: crate::config::DEFAULT_MAX_BATCH_REQUESTS,
            max_changes_per_message: crate::config::DEFAULT_MAX_CHANGES_PER_MESSAGE,
        }
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch of {len} requests exceeds the limit of {max}")]
    TooLarge { len: usize, max: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl BatchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::TooLarge { .. } => BATCH_TOO_LARGE,
            Self::Store(error) => error.code(),
            Self::Tool(error) => error.code(),
        }
    }
}

/// One message published on a notebook, with the connection whose batch
/// produced it.
#[derive(Debug, Clone)]
pub struct NotebookEvent {
    pub origin: Option<ConnectionId>,
    pub message: ServerMessage,
}

impl NotebookEvent {
    /// The message as `connection` should see it. Trackers and undo requests
    /// only go back to the originating connection.
    pub fn message_for(&self, connection: ConnectionId) -> ServerMessage {
        if self.origin == Some(connection) {
            return self.message.clone();
        }
        match &self.message {
            ServerMessage::NotebookChanged { notebook_path, changes, complete, .. } => {
                ServerMessage::NotebookChanged {
                    notebook_path: notebook_path.clone(),
                    changes: changes.clone(),
                    tracker: None,
                    complete: *complete,
                    undo_change_requests: Vec::new(),
                }
            }
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub changes: Vec<NotebookChange>,
    pub undo_change_requests: Vec<ChangeRequest>,
    pub messages: usize,
}

/// Authoritative state of one open notebook.
///
/// Batches are applied under the lock and handed to every subscriber's
/// outbound queue before it is released, so every subscriber sees the same
/// total order and nothing published is ever skipped.
pub struct NotebookSession {
    path: String,
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    store: EntityStore,
    subscribers: HashMap<ConnectionId, mpsc::UnboundedSender<ServerMessage>>,
}

impl SessionInner {
    fn deliver(&mut self, event: &NotebookEvent) {
        self.subscribers.retain(|connection, outbound| outbound.send(event.message_for(*connection)).is_ok());
    }
}

impl NotebookSession {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(SessionInner { store: EntityStore::new(), subscribers: HashMap::new() }),
        }
    }

    /// Queues the current snapshot on `outbound`, then everything published
    /// after it. Subscribing again replaces the previous queue, so the new
    /// snapshot is never followed by records it already contains.
    pub async fn subscribe(&self, connection: ConnectionId, outbound: mpsc::UnboundedSender<ServerMessage>) {
        let mut inner = self.inner.lock().await;
        let snapshot = inner.store.snapshot();
        if outbound.send(ServerMessage::NotebookOpened { notebook_path: self.path.clone(), snapshot }).is_ok() {
            inner.subscribers.insert(connection, outbound);
        } else {
            inner.subscribers.remove(&connection);
        }
    }

    /// Stops delivery to `connection`. Nothing published afterwards reaches it.
    pub async fn unsubscribe(&self, connection: ConnectionId) -> bool {
        self.inner.lock().await.subscribers.remove(&connection).is_some()
    }

    pub async fn read<R>(&self, f: impl FnOnce(&EntityStore) -> R) -> R {
        let inner = self.inner.lock().await;
        f(&inner.store)
    }

    /// Applies `requests` atomically and publishes the resulting records.
    ///
    /// On error nothing is mutated and nothing is published.
    pub async fn apply_batch(
        &self,
        origin: Option<ConnectionId>,
        requests: &[ChangeRequest],
        options: &ChangeOptions,
        tools: &ToolRegistry,
        limits: BatchLimits,
    ) -> Result<BatchOutcome, BatchError> {
        if requests.len() > limits.max_batch_requests {
            return Err(BatchError::TooLarge { len: requests.len(), max: limits.max_batch_requests });
        }

        let mut inner = self.inner.lock().await;
        let mut staged = inner.store.clone();
        let mut changes = Vec::new();
        for request in requests {
            match request {
                ChangeRequest::UseTool { style_id } => {
                    let mut cx = ToolContext::new(&mut staged);
                    tools.use_tool(*style_id, &mut cx)?;
                    changes.extend(cx.into_changes());
                }
                structural => changes.extend(staged.apply_request(structural)?),
            }
        }

        let undo_change_requests =
            if options.want_undo { undo_requests(&inner.store, &changes) } else { Vec::new() };
        inner.store = staged;

        let events = self.split(origin, options.tracker, &changes, undo_change_requests.clone(), limits);
        for event in &events {
            inner.deliver(event);
        }
        debug!(
            notebook_path = %self.path,
            tracker = ?options.tracker,
            requests = requests.len(),
            changes = changes.len(),
            messages = events.len(),
            subscribers = inner.subscribers.len(),
            "batch applied"
        );

        Ok(BatchOutcome { changes, undo_change_requests, messages: events.len() })
    }

    /// Splits `changes` into `notebookChanged` messages. An empty batch still
    /// gets one complete message so trackers resolve.
    fn split(
        &self,
        origin: Option<ConnectionId>,
        tracker: Option<u64>,
        changes: &[NotebookChange],
        mut undo: Vec<ChangeRequest>,
        limits: BatchLimits,
    ) -> Vec<NotebookEvent> {
        let mut chunks: Vec<&[NotebookChange]> = changes.chunks(limits.max_changes_per_message.max(1)).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }

        let last = chunks.len() - 1;
        chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| {
                let complete = index == last;
                let message = ServerMessage::NotebookChanged {
                    notebook_path: self.path.clone(),
                    changes: chunk.to_vec(),
                    tracker,
                    complete,
                    undo_change_requests: if complete { std::mem::take(&mut undo) } else { Vec::new() },
                };
                NotebookEvent { origin, message }
            })
            .collect()
    }
}

/// Inverse requests for a batch, in the order they should be submitted.
///
/// Inserts are undone by deleting the outermost inserted entity. Deletions are
/// undone by re-inserting the deleted roots whose parent survives the batch;
/// cascaded descendants are not restored and re-inserted entities get new ids.
pub fn undo_requests(before: &EntityStore, changes: &[NotebookChange]) -> Vec<ChangeRequest> {
    let mut inserted: HashSet<EntityId> = HashSet::new();
    let mut deleted: HashSet<EntityId> = HashSet::new();
    for change in changes {
        if change.is_deletion() {
            deleted.insert(change.entity_id());
        } else {
            inserted.insert(change.entity_id());
        }
    }
    let gone = |id: &EntityId| deleted.contains(id);

    let mut undo = Vec::new();
    for change in changes.iter().rev() {
        match change {
            NotebookChange::ThoughtInserted { thought } => {
                if !gone(&thought.id) {
                    undo.push(ChangeRequest::DeleteThought { thought_id: thought.id });
                }
            }
            NotebookChange::StyleInserted { style } => {
                if !gone(&style.id) && !inserted.contains(&style.stylable_id) {
                    undo.push(ChangeRequest::DeleteStyle { style_id: style.id });
                }
            }
            NotebookChange::RelationshipInserted { relationship } => {
                let endpoint_new =
                    inserted.contains(&relationship.from_id) || inserted.contains(&relationship.to_id);
                if !gone(&relationship.id) && !endpoint_new {
                    undo.push(ChangeRequest::DeleteRelationship { relationship_id: relationship.id });
                }
            }
            NotebookChange::ThoughtDeleted { thought_id } => {
                if let Some(thought) = before.thought(*thought_id) {
                    undo.push(ChangeRequest::InsertThought { position: thought.position });
                }
            }
            NotebookChange::StyleDeleted { style_id } => {
                if let Some(style) = before.style(*style_id) {
                    if !gone(&style.stylable_id) {
                        undo.push(ChangeRequest::insert_style(style.props()));
                    }
                }
            }
            NotebookChange::RelationshipDeleted { relationship_id } => {
                if let Some(relationship) = before.relationship(*relationship_id) {
                    if !gone(&relationship.from_id) && !gone(&relationship.to_id) {
                        undo.push(ChangeRequest::InsertRelationship {
                            from_id: relationship.from_id,
                            to_id: relationship.to_id,
                            role: relationship.role,
                        });
                    }
                }
            }
        }
    }
    undo
}
