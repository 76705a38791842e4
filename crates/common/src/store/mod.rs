// In-memory notebook graph: thoughts, styles and relationships.
//
// The server mutates a store through the `insert_*` / `delete_*` methods, which
// allocate ids and return the records they produced. Mirrors only ever call
// `apply_change` with records received from the server. Both paths share the
// same link/unlink helpers, so the indices stay identical on either side.

mod query;
mod snapshot;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use thiserror::Error;

use crate::change::{ChangeRequest, NotebookChange};
use crate::model::{
    EntityId, Relationship, RelationshipId, RelationshipRole, StylableId, Style, StyleId,
    StyleProps, Thought, ThoughtId, ThoughtPosition,
};

pub use query::{RelationshipPattern, StylePattern};
pub use snapshot::NotebookSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unknown stylable {0}")]
    UnknownStylable(EntityId),
    #[error("entity {0} not found")]
    NotFound(EntityId),
    #[error("entity {0} already exists")]
    DuplicateId(EntityId),
    #[error("entity {0} still has attached styles or relationships")]
    HasDependents(EntityId),
    #[error("`{0}` requests are not structural and cannot be applied to a store")]
    NotStructural(&'static str),
    #[error("store invariant violated: {0}")]
    InvariantViolated(String),
}

impl StoreError {
    /// Stable wire code reported to clients.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnknownStylable(_) => "UNKNOWN_STYLABLE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::DuplicateId(_) => "DUPLICATE_ID",
            Self::HasDependents(_) => "HAS_DEPENDENTS",
            Self::NotStructural(_) => "NOT_STRUCTURAL",
            Self::InvariantViolated(_) => "INVARIANT_VIOLATED",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    /// Last id handed out. Ids start at 1.
    last_id: EntityId,
    thought_order: Vec<ThoughtId>,
    thoughts: HashMap<ThoughtId, Thought>,
    styles: HashMap<StyleId, Style>,
    /// Direct child styles of each stylable, in insertion order.
    children: HashMap<StylableId, Vec<StyleId>>,
    /// Keyed by id, so iteration follows insertion order.
    relationships: BTreeMap<RelationshipId, Relationship>,
    /// Relationships touching each stylable, from either end.
    incident: HashMap<StylableId, BTreeSet<RelationshipId>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Server-side mutation ───────────────────────────────────────

    pub fn insert_thought(&mut self, position: Option<ThoughtPosition>) -> Thought {
        let thought = Thought { id: self.allocate_id(), position };
        self.link_thought(thought.clone());
        thought
    }

    pub fn insert_style(&mut self, props: StyleProps) -> Result<Style, StoreError> {
        if !self.contains_stylable(props.stylable_id) {
            return Err(StoreError::UnknownStylable(props.stylable_id));
        }
        let style = Style::from_props(self.allocate_id(), props);
        self.link_style(style.clone());
        Ok(style)
    }

    pub fn insert_relationship(
        &mut self,
        from_id: StylableId,
        to_id: StylableId,
        role: RelationshipRole,
    ) -> Result<Relationship, StoreError> {
        for endpoint in [from_id, to_id] {
            if !self.contains_stylable(endpoint) {
                return Err(StoreError::UnknownStylable(endpoint));
            }
        }
        let relationship = Relationship { id: self.allocate_id(), from_id, to_id, role };
        self.link_relationship(relationship.clone());
        Ok(relationship)
    }

    /// Deletes a thought with its styles and every relationship touching them.
    /// Returns the cascade, innermost first.
    pub fn delete_thought(&mut self, id: ThoughtId) -> Result<Vec<NotebookChange>, StoreError> {
        if !self.thoughts.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        self.delete_cascade(id)
    }

    /// Deletes a style with its descendant styles and every relationship
    /// touching them. Returns the cascade, innermost first.
    pub fn delete_style(&mut self, id: StyleId) -> Result<Vec<NotebookChange>, StoreError> {
        if !self.styles.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        self.delete_cascade(id)
    }

    pub fn delete_relationship(&mut self, id: RelationshipId) -> Result<NotebookChange, StoreError> {
        if !self.relationships.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        let change = NotebookChange::RelationshipDeleted { relationship_id: id };
        self.apply_change(&change)?;
        Ok(change)
    }

    /// Applies one structural request and returns the records it produced.
    ///
    /// Not atomic on its own: a failing request leaves earlier requests of the
    /// same batch applied. Callers that need batch atomicity stage on a clone.
    pub fn apply_request(&mut self, request: &ChangeRequest) -> Result<Vec<NotebookChange>, StoreError> {
        match request {
            ChangeRequest::InsertThought { position } => {
                let thought = self.insert_thought(*position);
                Ok(vec![NotebookChange::ThoughtInserted { thought }])
            }
            ChangeRequest::InsertStyle { style_props } => {
                let style = self.insert_style(style_props.clone())?;
                Ok(vec![NotebookChange::StyleInserted { style }])
            }
            ChangeRequest::InsertRelationship { from_id, to_id, role } => {
                let relationship = self.insert_relationship(*from_id, *to_id, *role)?;
                Ok(vec![NotebookChange::RelationshipInserted { relationship }])
            }
            ChangeRequest::DeleteThought { thought_id } => self.delete_thought(*thought_id),
            ChangeRequest::DeleteStyle { style_id } => self.delete_style(*style_id),
            ChangeRequest::DeleteRelationship { relationship_id } => {
                Ok(vec![self.delete_relationship(*relationship_id)?])
            }
            ChangeRequest::UseTool { .. } => Err(StoreError::NotStructural(request.kind())),
        }
    }

    // ── Mirror-side application ────────────────────────────────────

    /// Applies a record produced by an authoritative store.
    ///
    /// Records must arrive in the order they were produced: a style's parent
    /// before the style, a cascade's descendants before their ancestor.
    pub fn apply_change(&mut self, change: &NotebookChange) -> Result<(), StoreError> {
        match change {
            NotebookChange::ThoughtInserted { thought } => {
                self.ensure_vacant(thought.id)?;
                self.observe_id(thought.id);
                self.link_thought(thought.clone());
            }
            NotebookChange::StyleInserted { style } => {
                self.ensure_vacant(style.id)?;
                if !self.contains_stylable(style.stylable_id) {
                    return Err(StoreError::UnknownStylable(style.stylable_id));
                }
                self.observe_id(style.id);
                self.link_style(style.clone());
            }
            NotebookChange::RelationshipInserted { relationship } => {
                self.ensure_vacant(relationship.id)?;
                for endpoint in [relationship.from_id, relationship.to_id] {
                    if !self.contains_stylable(endpoint) {
                        return Err(StoreError::UnknownStylable(endpoint));
                    }
                }
                self.observe_id(relationship.id);
                self.link_relationship(relationship.clone());
            }
            NotebookChange::ThoughtDeleted { thought_id } => {
                if !self.thoughts.contains_key(thought_id) {
                    return Err(StoreError::NotFound(*thought_id));
                }
                self.ensure_detached(*thought_id)?;
                self.thoughts.remove(thought_id);
                self.thought_order.retain(|id| id != thought_id);
                self.children.remove(thought_id);
                self.incident.remove(thought_id);
            }
            NotebookChange::StyleDeleted { style_id } => {
                let Some(style) = self.styles.get(style_id) else {
                    return Err(StoreError::NotFound(*style_id));
                };
                let parent_id = style.stylable_id;
                self.ensure_detached(*style_id)?;
                self.styles.remove(style_id);
                if let Some(siblings) = self.children.get_mut(&parent_id) {
                    siblings.retain(|id| id != style_id);
                }
                self.children.remove(style_id);
                self.incident.remove(style_id);
            }
            NotebookChange::RelationshipDeleted { relationship_id } => {
                let Some(relationship) = self.relationships.remove(relationship_id) else {
                    return Err(StoreError::NotFound(*relationship_id));
                };
                for endpoint in [relationship.from_id, relationship.to_id] {
                    if let Some(edges) = self.incident.get_mut(&endpoint) {
                        edges.remove(relationship_id);
                    }
                }
            }
        }
        Ok(())
    }

    // ── Lookups ────────────────────────────────────────────────────

    pub fn thought(&self, id: ThoughtId) -> Option<&Thought> {
        self.thoughts.get(&id)
    }

    pub fn style(&self, id: StyleId) -> Option<&Style> {
        self.styles.get(&id)
    }

    pub fn relationship(&self, id: RelationshipId) -> Option<&Relationship> {
        self.relationships.get(&id)
    }

    pub fn contains_stylable(&self, id: StylableId) -> bool {
        self.thoughts.contains_key(&id) || self.styles.contains_key(&id)
    }

    /// Thoughts in top-level order.
    pub fn thoughts(&self) -> impl Iterator<Item = &Thought> + '_ {
        self.thought_order.iter().filter_map(|id| self.thoughts.get(id))
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> + '_ {
        self.relationships.values()
    }

    /// Direct child styles of a stylable, in insertion order.
    pub fn child_style_ids(&self, id: StylableId) -> &[StyleId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Walks up the style tree to the owning thought.
    pub fn thought_of(&self, id: StylableId) -> Option<ThoughtId> {
        let mut current = id;
        loop {
            if self.thoughts.contains_key(&current) {
                return Some(current);
            }
            current = self.styles.get(&current)?.stylable_id;
        }
    }

    pub fn thought_count(&self) -> usize {
        self.thoughts.len()
    }

    pub fn style_count(&self) -> usize {
        self.styles.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thoughts.is_empty() && self.styles.is_empty() && self.relationships.is_empty()
    }

    /// Verifies that every reference resolves and the indices agree with the
    /// entity maps.
    pub fn check_invariants(&self) -> Result<(), StoreError> {
        let violated = |message: String| Err(StoreError::InvariantViolated(message));

        for style in self.styles.values() {
            if !self.contains_stylable(style.stylable_id) {
                return violated(format!("style {} has dangling parent {}", style.id, style.stylable_id));
            }
            if !self.child_style_ids(style.stylable_id).contains(&style.id) {
                return violated(format!("style {} missing from its parent's children", style.id));
            }
        }
        for relationship in self.relationships.values() {
            for endpoint in [relationship.from_id, relationship.to_id] {
                if !self.contains_stylable(endpoint) {
                    return violated(format!(
                        "relationship {} has dangling endpoint {endpoint}",
                        relationship.id
                    ));
                }
                if !self.incident.get(&endpoint).is_some_and(|edges| edges.contains(&relationship.id)) {
                    return violated(format!(
                        "relationship {} missing from endpoint index of {endpoint}",
                        relationship.id
                    ));
                }
            }
        }
        for (parent, children) in &self.children {
            if !self.contains_stylable(*parent) {
                return violated(format!("children index references missing stylable {parent}"));
            }
            for child in children {
                if self.styles.get(child).map(|style| style.stylable_id) != Some(*parent) {
                    return violated(format!("children index of {parent} lists foreign style {child}"));
                }
            }
        }
        if self.thought_order.len() != self.thoughts.len() {
            return violated("thought order out of sync with thought map".to_string());
        }
        Ok(())
    }

    // ── Internals ──────────────────────────────────────────────────

    fn allocate_id(&mut self) -> EntityId {
        self.last_id += 1;
        self.last_id
    }

    fn observe_id(&mut self, id: EntityId) {
        self.last_id = self.last_id.max(id);
    }

    fn ensure_vacant(&self, id: EntityId) -> Result<(), StoreError> {
        if self.thoughts.contains_key(&id)
            || self.styles.contains_key(&id)
            || self.relationships.contains_key(&id)
        {
            return Err(StoreError::DuplicateId(id));
        }
        Ok(())
    }

    fn ensure_detached(&self, id: StylableId) -> Result<(), StoreError> {
        let has_children = !self.child_style_ids(id).is_empty();
        let has_edges = self.incident.get(&id).is_some_and(|edges| !edges.is_empty());
        if has_children || has_edges {
            return Err(StoreError::HasDependents(id));
        }
        Ok(())
    }

    fn link_thought(&mut self, thought: Thought) {
        self.thought_order.push(thought.id);
        self.thoughts.insert(thought.id, thought);
    }

    fn link_style(&mut self, style: Style) {
        self.children.entry(style.stylable_id).or_default().push(style.id);
        self.styles.insert(style.id, style);
    }

    fn link_relationship(&mut self, relationship: Relationship) {
        self.incident.entry(relationship.from_id).or_default().insert(relationship.id);
        self.incident.entry(relationship.to_id).or_default().insert(relationship.id);
        self.relationships.insert(relationship.id, relationship);
    }

    fn delete_cascade(&mut self, root: StylableId) -> Result<Vec<NotebookChange>, StoreError> {
        let mut changes = Vec::new();
        let mut seen_relationships = BTreeSet::new();
        self.collect_cascade(root, &mut changes, &mut seen_relationships);
        for change in &changes {
            self.apply_change(change)?;
        }
        Ok(changes)
    }

    /// Post-order walk: descendants, then incident relationships, then the node.
    fn collect_cascade(
        &self,
        id: StylableId,
        changes: &mut Vec<NotebookChange>,
        seen_relationships: &mut BTreeSet<RelationshipId>,
    ) {
        for child in self.child_style_ids(id) {
            self.collect_cascade(*child, changes, seen_relationships);
        }
        if let Some(edges) = self.incident.get(&id) {
            for relationship_id in edges {
                if seen_relationships.insert(*relationship_id) {
                    changes.push(NotebookChange::RelationshipDeleted { relationship_id: *relationship_id });
                }
            }
        }
        if self.thoughts.contains_key(&id) {
            changes.push(NotebookChange::ThoughtDeleted { thought_id: id });
        } else {
            changes.push(NotebookChange::StyleDeleted { style_id: id });
        }
    }
}
