use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::engine::notebook::NotebookSession;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid notebook path `{0}`: expected an absolute path such as `/algebra`")]
pub struct InvalidNotebookPath(pub String);

struct ManagedNotebook {
    session: Arc<NotebookSession>,
    subscribers: usize,
}

/// Open notebooks keyed by path, with a subscriber count per notebook.
///
/// Notebooks live only in memory. When the last subscriber leaves, an empty
/// notebook is evicted; one with content stays resident for the life of the
/// process and is handed back to the next connection that opens it.
#[derive(Default)]
pub struct NotebookRegistry {
    notebooks: HashMap<String, ManagedNotebook>,
}

impl NotebookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_or_create(&mut self, path: &str) -> Result<Arc<NotebookSession>, InvalidNotebookPath> {
        validate_notebook_path(path)?;
        if let Some(entry) = self.notebooks.get_mut(path) {
            entry.subscribers = entry.subscribers.saturating_add(1);
            return Ok(Arc::clone(&entry.session));
        }

        let session = Arc::new(NotebookSession::new(path));
        self.notebooks
            .insert(path.to_owned(), ManagedNotebook { session: Arc::clone(&session), subscribers: 1 });
        Ok(session)
    }

    /// Drops one subscription. Returns false if `path` had none.
    pub async fn close(&mut self, path: &str) -> bool {
        let Some(entry) = self.notebooks.get_mut(path) else {
            return false;
        };
        if entry.subscribers == 0 {
            return false;
        }
        entry.subscribers -= 1;
        if entry.subscribers == 0 && entry.session.read(|store| store.is_empty()).await {
            self.notebooks.remove(path);
            debug!(notebook_path = %path, "evicted empty notebook");
        }
        true
    }

    pub fn subscriber_count(&self, path: &str) -> usize {
        self.notebooks.get(path).map(|entry| entry.subscribers).unwrap_or(0)
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.notebooks.keys().cloned().collect();
        paths.sort();
        paths
    }
}

pub fn validate_notebook_path(path: &str) -> Result<(), InvalidNotebookPath> {
    let invalid = || InvalidNotebookPath(path.to_owned());
    if !path.starts_with('/') || path.len() < 2 {
        return Err(invalid());
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(invalid());
    }
    Ok(())
}
