// Style and relationship queries over the parent/endpoint indices.

use crate::model::{Relationship, RelationshipRole, StylableId, Style, StyleId, StyleRole, StyleType};

use super::EntityStore;

/// Match criteria for style searches. Unset fields match anything; set
/// fields are AND-combined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StylePattern {
    pub role: Option<StyleRole>,
    pub subrole: Option<String>,
    pub style_type: Option<StyleType>,
    /// Scan whole subtrees instead of direct children only.
    pub recursive: bool,
}

impl StylePattern {
    pub fn role(role: StyleRole) -> Self {
        Self { role: Some(role), ..Self::default() }
    }

    pub fn style_type(style_type: StyleType) -> Self {
        Self { style_type: Some(style_type), ..Self::default() }
    }

    pub fn with_subrole(mut self, subrole: impl Into<String>) -> Self {
        self.subrole = Some(subrole.into());
        self
    }

    pub fn with_type(mut self, style_type: StyleType) -> Self {
        self.style_type = Some(style_type);
        self
    }

    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    pub fn matches(&self, style: &Style) -> bool {
        self.role.is_none_or(|role| role == style.role)
            && self.subrole.as_deref().is_none_or(|subrole| style.subrole.as_deref() == Some(subrole))
            && self.style_type.is_none_or(|style_type| style_type == style.style_type())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelationshipPattern {
    pub from_id: Option<StylableId>,
    pub to_id: Option<StylableId>,
    pub role: Option<RelationshipRole>,
}

impl RelationshipPattern {
    pub fn matches(&self, relationship: &Relationship) -> bool {
        self.from_id.is_none_or(|id| id == relationship.from_id)
            && self.to_id.is_none_or(|id| id == relationship.to_id)
            && self.role.is_none_or(|role| role == relationship.role)
    }
}

impl EntityStore {
    /// First style matching `pattern`, in pre-order.
    pub fn find_style(&self, pattern: &StylePattern, within: Option<StylableId>) -> Option<&Style> {
        self.find_styles(pattern, within).into_iter().next()
    }

    /// All styles matching `pattern`, in pre-order with siblings in insertion order.
    ///
    /// With `within`, the search starts at that stylable's children. Without
    /// it, every thought is a root, in top-level order.
    pub fn find_styles(&self, pattern: &StylePattern, within: Option<StylableId>) -> Vec<&Style> {
        let mut found = Vec::new();
        match within {
            Some(root) => self.collect_matching(root, pattern, &mut found),
            None => {
                for thought_id in &self.thought_order {
                    self.collect_matching(*thought_id, pattern, &mut found);
                }
            }
        }
        found
    }

    /// Relationships matching `pattern`, in insertion order. Uses the endpoint
    /// index when either end is pinned.
    pub fn find_relationships(&self, pattern: &RelationshipPattern) -> Vec<&Relationship> {
        let Some(anchor) = pattern.from_id.or(pattern.to_id) else {
            return self.relationships.values().filter(|r| pattern.matches(r)).collect();
        };

        self.incident
            .get(&anchor)
            .into_iter()
            .flatten()
            .filter_map(|id| self.relationships.get(id))
            .filter(|r| pattern.matches(r))
            .collect()
    }

    /// Sibling inserted immediately before `id` under the same parent.
    pub fn preceding_style_id(&self, id: StyleId) -> Option<StyleId> {
        let (siblings, index) = self.sibling_position(id)?;
        index.checked_sub(1).map(|previous| siblings[previous])
    }

    /// Sibling inserted immediately after `id` under the same parent.
    pub fn following_style_id(&self, id: StyleId) -> Option<StyleId> {
        let (siblings, index) = self.sibling_position(id)?;
        siblings.get(index + 1).copied()
    }

    fn sibling_position(&self, id: StyleId) -> Option<(&[StyleId], usize)> {
        let parent = self.styles.get(&id)?.stylable_id;
        let siblings = self.child_style_ids(parent);
        let index = siblings.iter().position(|sibling| *sibling == id)?;
        Some((siblings, index))
    }

    fn collect_matching<'a>(&'a self, parent: StylableId, pattern: &StylePattern, found: &mut Vec<&'a Style>) {
        for child_id in self.child_style_ids(parent) {
            let Some(style) = self.styles.get(child_id) else {
                continue;
            };
            if pattern.matches(style) {
                found.push(style);
            }
            if pattern.recursive {
                self.collect_matching(*child_id, pattern, found);
            }
        }
    }
}
