// Correlates tracked request batches with the records they produce.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mathnote_common::change::{ChangeRequest, NotebookChange};
use mathnote_common::protocol::ws::{ServerMessage, TrackerToken};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::ClientError;

/// Everything a tracked batch produced, in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackedChanges {
    pub changes: Vec<NotebookChange>,
    pub undo_requests: Vec<ChangeRequest>,
}

struct Pending {
    notebook_path: String,
    accumulated: TrackedChanges,
    resolver: oneshot::Sender<Result<TrackedChanges, ClientError>>,
}

/// Pending tracked requests keyed by tracker token. Cheap to clone.
#[derive(Clone)]
pub struct TrackedChangeCoordinator {
    next_tracker: Arc<AtomicU64>,
    pending: Arc<Mutex<HashMap<TrackerToken, Pending>>>,
}

impl Default for TrackedChangeCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackedChangeCoordinator {
    pub fn new() -> Self {
        Self { next_tracker: Arc::new(AtomicU64::new(1)), pending: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Allocates a tracker and an accumulator for a batch on `notebook_path`.
    pub fn register(&self, notebook_path: &str) -> PendingBatch {
        let tracker = self.next_tracker.fetch_add(1, Ordering::SeqCst);
        let (resolver, receiver) = oneshot::channel();
        self.lock().insert(
            tracker,
            Pending { notebook_path: notebook_path.to_owned(), accumulated: TrackedChanges::default(), resolver },
        );
        PendingBatch { tracker, receiver: Some(receiver), coordinator: self.clone() }
    }

    /// Drops a pending entry without resolving it.
    pub fn forget(&self, tracker: TrackerToken) -> bool {
        self.lock().remove(&tracker).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Folds a server message into its accumulator. Returns whether the
    /// message's tracker belonged to a pending batch.
    pub fn handle_message(&self, message: &ServerMessage) -> bool {
        let Some(tracker) = message.tracker() else {
            return false;
        };

        let mut pending = self.lock();
        let Some(entry) = pending.get_mut(&tracker) else {
            debug!(tracker, "no pending request for tracker");
            return false;
        };
        if message.notebook_path() != Some(entry.notebook_path.as_str()) {
            debug!(tracker, notebook_path = ?message.notebook_path(), "tracker arrived for another notebook");
            return false;
        }

        match message {
            ServerMessage::NotebookChanged { changes, complete, undo_change_requests, .. } => {
                entry.accumulated.changes.extend(changes.iter().cloned());
                entry.accumulated.undo_requests.extend(undo_change_requests.iter().cloned());
                if *complete {
                    if let Some(done) = pending.remove(&tracker) {
                        let _ = done.resolver.send(Ok(done.accumulated));
                    }
                }
            }
            ServerMessage::ChangeFailed { code, message, .. } => {
                if let Some(failed) = pending.remove(&tracker) {
                    let _ = failed
                        .resolver
                        .send(Err(ClientError::Rejected { code: code.clone(), message: message.clone() }));
                }
            }
            _ => return false,
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TrackerToken, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Future side of a registered batch. Dropping it, including dropping an
/// unfinished `wait`, releases the pending entry.
pub struct PendingBatch {
    tracker: TrackerToken,
    receiver: Option<oneshot::Receiver<Result<TrackedChanges, ClientError>>>,
    coordinator: TrackedChangeCoordinator,
}

impl PendingBatch {
    pub fn tracker(&self) -> TrackerToken {
        self.tracker
    }

    /// Waits for the batch to complete. On expiry the entry is removed and
    /// later messages for the tracker are treated as unmatched.
    pub async fn wait(mut self, timeout: Duration) -> Result<TrackedChanges, ClientError> {
        let Some(receiver) = self.receiver.take() else {
            return Err(ClientError::ChannelClosed);
        };
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::ChannelClosed),
            Err(_) => Err(ClientError::Timeout { tracker: self.tracker, after: timeout }),
        }
    }

    /// Abandons the batch, e.g. when sending it failed.
    pub fn cancel(self) {}
}

impl Drop for PendingBatch {
    fn drop(&mut self) {
        // No-op once the batch resolved.
        self.coordinator.forget(self.tracker);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mathnote_common::change::{ChangeRequest, NotebookChange};
    use mathnote_common::model::Thought;
    use mathnote_common::protocol::ws::ServerMessage;

    use super::TrackedChangeCoordinator;
    use crate::error::ClientError;

    fn changed(tracker: u64, id: u64, complete: bool, undo: Vec<ChangeRequest>) -> ServerMessage {
        ServerMessage::NotebookChanged {
            notebook_path: "/n".into(),
            changes: vec![NotebookChange::ThoughtInserted { thought: Thought { id, position: None } }],
            tracker: Some(tracker),
            complete,
            undo_change_requests: undo,
        }
    }

    #[tokio::test]
    async fn batch_split_across_messages_resolves_with_both_in_order() {
        let coordinator = TrackedChangeCoordinator::new();
        let batch = coordinator.register("/n");
        let tracker = batch.tracker();

        assert!(coordinator.handle_message(&changed(tracker, 1, false, Vec::new())));
        let undo = vec![ChangeRequest::DeleteThought { thought_id: 2 }, ChangeRequest::DeleteThought { thought_id: 1 }];
        assert!(coordinator.handle_message(&changed(tracker, 2, true, undo.clone())));

        let tracked = batch.wait(Duration::from_secs(1)).await.unwrap();
        let ids: Vec<u64> = tracked.changes.iter().map(NotebookChange::entity_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(tracked.undo_requests, undo);
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[test]
    fn trackers_are_unique_and_increasing() {
        let coordinator = TrackedChangeCoordinator::new();
        let a = coordinator.register("/n");
        let b = coordinator.clone().register("/n");
        assert!(b.tracker() > a.tracker());
        assert_eq!(coordinator.pending_count(), 2);
    }

    #[tokio::test]
    async fn change_failed_rejects_the_future() {
        let coordinator = TrackedChangeCoordinator::new();
        let batch = coordinator.register("/n");
        coordinator.handle_message(&ServerMessage::ChangeFailed {
            notebook_path: "/n".into(),
            tracker: Some(batch.tracker()),
            code: "UNKNOWN_STYLABLE".into(),
            message: "unknown stylable 9".into(),
        });

        let error = batch.wait(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(error.code(), Some("UNKNOWN_STYLABLE"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_the_entry() {
        let coordinator = TrackedChangeCoordinator::new();
        let batch = coordinator.register("/n");
        let tracker = batch.tracker();

        let error = batch.wait(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(error, ClientError::Timeout { tracker: t, .. } if t == tracker));
        assert_eq!(coordinator.pending_count(), 0);

        // A late completion is now unmatched.
        assert!(!coordinator.handle_message(&changed(tracker, 1, true, Vec::new())));
    }

    #[test]
    fn untracked_and_foreign_messages_are_not_matched() {
        let coordinator = TrackedChangeCoordinator::new();
        let batch = coordinator.register("/n");

        let mut untracked = changed(batch.tracker(), 1, true, Vec::new());
        if let ServerMessage::NotebookChanged { tracker, .. } = &mut untracked {
            *tracker = None;
        }
        assert!(!coordinator.handle_message(&untracked));
        assert!(!coordinator.handle_message(&changed(batch.tracker() + 100, 1, true, Vec::new())));
        assert_eq!(coordinator.pending_count(), 1);

        batch.cancel();
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_waits_release_their_entries() {
        let coordinator = TrackedChangeCoordinator::new();
        for _ in 0..3 {
            let batch = coordinator.register("/n");
            let abandoned = tokio::time::timeout(Duration::from_millis(5), batch.wait(Duration::from_secs(60))).await;
            assert!(abandoned.is_err());
        }
        assert_eq!(coordinator.pending_count(), 0);

        let never_awaited = coordinator.register("/n");
        assert_eq!(coordinator.pending_count(), 1);
        drop(never_awaited);
        assert_eq!(coordinator.pending_count(), 0);
    }
}
