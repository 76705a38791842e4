use serde::{Deserialize, Serialize};

use crate::change::NotebookChange;
use crate::model::{Relationship, StylableId, Style, Thought};

use super::{EntityStore, StoreError};

/// Full notebook state as sent in `notebookOpened`.
///
/// Styles are listed in pre-order, so replaying the lists front to back never
/// references a parent that has not been seen yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotebookSnapshot {
    pub thoughts: Vec<Thought>,
    pub styles: Vec<Style>,
    pub relationships: Vec<Relationship>,
}

impl NotebookSnapshot {
    /// The snapshot as a sequence of insert records.
    pub fn into_changes(self) -> Vec<NotebookChange> {
        let thoughts = self.thoughts.into_iter().map(|thought| NotebookChange::ThoughtInserted { thought });
        let styles = self.styles.into_iter().map(|style| NotebookChange::StyleInserted { style });
        let relationships = self
            .relationships
            .into_iter()
            .map(|relationship| NotebookChange::RelationshipInserted { relationship });
        thoughts.chain(styles).chain(relationships).collect()
    }
}

impl EntityStore {
    pub fn snapshot(&self) -> NotebookSnapshot {
        let mut styles = Vec::with_capacity(self.styles.len());
        for thought_id in &self.thought_order {
            self.push_subtree(*thought_id, &mut styles);
        }

        NotebookSnapshot {
            thoughts: self.thoughts().cloned().collect(),
            styles,
            relationships: self.relationships.values().cloned().collect(),
        }
    }

    pub fn from_snapshot(snapshot: NotebookSnapshot) -> Result<Self, StoreError> {
        let mut store = Self::new();
        for change in snapshot.into_changes() {
            store.apply_change(&change)?;
        }
        Ok(store)
    }

    fn push_subtree(&self, parent: StylableId, out: &mut Vec<Style>) {
        for child_id in self.child_style_ids(parent) {
            if let Some(style) = self.styles.get(child_id) {
                out.push(style.clone());
                self.push_subtree(*child_id, out);
            }
        }
    }
}
