// Client-side copies of open notebooks.

use std::collections::HashMap;
use std::sync::Arc;

use mathnote_common::change::NotebookChange;
use mathnote_common::protocol::ws::ServerMessage;
use mathnote_common::store::{EntityStore, NotebookSnapshot, StoreError};
use tracing::{debug, warn};

/// Observer of one mirrored notebook.
///
/// Callbacks run on the client's reader task while the mirror is locked, so
/// they must not call back into [`MirrorRegistry`].
pub trait NotebookWatcher: Send + Sync {
    /// Called once per record. For insertions the store already contains the
    /// new entity; for deletions the store still contains the doomed one.
    fn on_change(&self, change: &NotebookChange, store: &EntityStore);

    /// Called once after each complete batch and after each snapshot.
    fn on_changes_finished(&self, _store: &EntityStore) {}

    fn on_closed(&self) {}
}

/// Mirror of one notebook: the local store plus its watchers.
pub struct NotebookController {
    path: String,
    store: EntityStore,
    watchers: Vec<Arc<dyn NotebookWatcher>>,
    opened: bool,
    /// Set after a rejected record until the next snapshot replaces the store.
    resyncing: bool,
}

impl NotebookController {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), store: EntityStore::new(), watchers: Vec::new(), opened: false, resyncing: false }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// True once a snapshot has been received.
    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn add_watcher(&mut self, watcher: Arc<dyn NotebookWatcher>) {
        self.watchers.push(watcher);
    }

    /// Replaces the local state wholesale.
    pub fn apply_snapshot(&mut self, snapshot: NotebookSnapshot) -> Result<(), StoreError> {
        self.store = EntityStore::from_snapshot(snapshot)?;
        self.opened = true;
        self.resyncing = false;
        self.finish();
        Ok(())
    }

    /// Applies records in server order.
    ///
    /// Insertions update the store, then notify. Deletions notify, then update
    /// the store. Stops at the first record the store rejects.
    pub fn apply_changes(&mut self, changes: &[NotebookChange], complete: bool) -> Result<(), StoreError> {
        for change in changes {
            if change.is_deletion() {
                self.notify(change);
                self.store.apply_change(change)?;
            } else {
                self.store.apply_change(change)?;
                self.notify(change);
            }
        }
        if complete {
            self.finish();
        }
        Ok(())
    }

    fn notify(&self, change: &NotebookChange) {
        for watcher in &self.watchers {
            watcher.on_change(change, &self.store);
        }
    }

    fn finish(&self) {
        for watcher in &self.watchers {
            watcher.on_changes_finished(&self.store);
        }
    }

    fn close(&self) {
        for watcher in &self.watchers {
            watcher.on_closed();
        }
    }
}

/// What the caller should do after a message was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorUpdate {
    Applied,
    Ignored,
    /// The mirror rejected a record and needs a fresh snapshot.
    Diverged { notebook_path: String, error: StoreError },
}

/// Every notebook mirrored by one client, keyed by path.
#[derive(Default)]
pub struct MirrorRegistry {
    controllers: HashMap<String, NotebookController>,
}

impl MirrorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `watcher` for `path`, before or after the notebook opens.
    pub fn watch(&mut self, path: &str, watcher: Arc<dyn NotebookWatcher>) {
        self.controller_mut(path).add_watcher(watcher);
    }

    pub fn get(&self, path: &str) -> Option<&NotebookController> {
        self.controllers.get(path)
    }

    pub fn is_open(&self, path: &str) -> bool {
        self.controllers.get(path).is_some_and(NotebookController::is_open)
    }

    pub fn open_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .controllers
            .values()
            .filter(|controller| controller.is_open())
            .map(NotebookController::path)
            .collect();
        paths.sort_unstable();
        paths
    }

    pub fn handle_message(&mut self, message: &ServerMessage) -> MirrorUpdate {
        match message {
            ServerMessage::NotebookOpened { notebook_path, snapshot } => {
                let controller = self.controller_mut(notebook_path);
                match controller.apply_snapshot(snapshot.clone()) {
                    Ok(()) => {
                        debug!(%notebook_path, thoughts = snapshot.thoughts.len(), "mirror loaded snapshot");
                        MirrorUpdate::Applied
                    }
                    Err(error) => diverged(notebook_path, error),
                }
            }
            ServerMessage::NotebookChanged { notebook_path, changes, complete, .. } => {
                let Some(controller) = self.controllers.get_mut(notebook_path.as_str()) else {
                    debug!(%notebook_path, "changes for a notebook that is not mirrored");
                    return MirrorUpdate::Ignored;
                };
                if controller.resyncing {
                    debug!(%notebook_path, "skipping changes while waiting for a snapshot");
                    return MirrorUpdate::Ignored;
                }
                match controller.apply_changes(changes, *complete) {
                    Ok(()) => MirrorUpdate::Applied,
                    Err(error) => {
                        controller.resyncing = true;
                        diverged(notebook_path, error)
                    }
                }
            }
            ServerMessage::NotebookClosed { notebook_path } => {
                if let Some(controller) = self.controllers.remove(notebook_path.as_str()) {
                    controller.close();
                }
                MirrorUpdate::Applied
            }
            ServerMessage::ChangeFailed { .. } | ServerMessage::Error { .. } => MirrorUpdate::Ignored,
        }
    }

    /// Notifies every watcher that the connection is gone and drops all mirrors.
    pub fn close_all(&mut self) {
        for (_, controller) in self.controllers.drain() {
            controller.close();
        }
    }

    fn controller_mut(&mut self, path: &str) -> &mut NotebookController {
        self.controllers.entry(path.to_owned()).or_insert_with(|| NotebookController::new(path))
    }
}

fn diverged(notebook_path: &str, error: StoreError) -> MirrorUpdate {
    warn!(%notebook_path, %error, "mirror rejected a record; requesting resync");
    MirrorUpdate::Diverged { notebook_path: notebook_path.to_owned(), error }
}
