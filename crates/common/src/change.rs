// Change vocabulary: what clients may ask for, and what the server reports back.
//
// Requests never carry server-assigned ids for new entities; records always do.

use serde::{Deserialize, Serialize};

use crate::model::{
    EntityId, Relationship, RelationshipId, RelationshipRole, StylableId, Style, StyleId,
    StyleProps, Thought, ThoughtId, ThoughtPosition,
};

/// A client-submitted intent to mutate a notebook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ChangeRequest {
    InsertThought {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<ThoughtPosition>,
    },
    InsertStyle {
        style_props: StyleProps,
    },
    InsertRelationship {
        from_id: StylableId,
        to_id: StylableId,
        role: RelationshipRole,
    },
    DeleteThought {
        thought_id: ThoughtId,
    },
    DeleteStyle {
        style_id: StyleId,
    },
    DeleteRelationship {
        relationship_id: RelationshipId,
    },
    /// Invoke the tool attached to a `TOOL-INFO` style. Expanded server-side
    /// into further requests.
    UseTool {
        style_id: StyleId,
    },
}

impl ChangeRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsertThought { .. } => "insertThought",
            Self::InsertStyle { .. } => "insertStyle",
            Self::InsertRelationship { .. } => "insertRelationship",
            Self::DeleteThought { .. } => "deleteThought",
            Self::DeleteStyle { .. } => "deleteStyle",
            Self::DeleteRelationship { .. } => "deleteRelationship",
            Self::UseTool { .. } => "useTool",
        }
    }

    pub fn insert_style(props: StyleProps) -> Self {
        Self::InsertStyle { style_props: props }
    }
}

/// A mutation the server actually performed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum NotebookChange {
    ThoughtInserted { thought: Thought },
    ThoughtDeleted { thought_id: ThoughtId },
    StyleInserted { style: Style },
    StyleDeleted { style_id: StyleId },
    RelationshipInserted { relationship: Relationship },
    RelationshipDeleted { relationship_id: RelationshipId },
}

impl NotebookChange {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ThoughtInserted { .. } => "thoughtInserted",
            Self::ThoughtDeleted { .. } => "thoughtDeleted",
            Self::StyleInserted { .. } => "styleInserted",
            Self::StyleDeleted { .. } => "styleDeleted",
            Self::RelationshipInserted { .. } => "relationshipInserted",
            Self::RelationshipDeleted { .. } => "relationshipDeleted",
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(
            self,
            Self::ThoughtDeleted { .. } | Self::StyleDeleted { .. } | Self::RelationshipDeleted { .. }
        )
    }

    /// Id of the entity this record is about.
    pub fn entity_id(&self) -> EntityId {
        match self {
            Self::ThoughtInserted { thought } => thought.id,
            Self::ThoughtDeleted { thought_id } => *thought_id,
            Self::StyleInserted { style } => style.id,
            Self::StyleDeleted { style_id } => *style_id,
            Self::RelationshipInserted { relationship } => relationship.id,
            Self::RelationshipDeleted { relationship_id } => *relationship_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::{StyleData, StyleRole, StyleSource};

    #[test]
    fn insert_style_request_nests_props_under_style_props() {
        let request = ChangeRequest::insert_style(StyleProps::new(
            1,
            StyleRole::Formula,
            StyleSource::User,
            StyleData::Latex("a+b".into()),
        ));

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "insertStyle");
        assert_eq!(value["styleProps"]["type"], "LATEX");
        assert_eq!(value["styleProps"]["stylableId"], 1);
        assert_eq!(serde_json::from_value::<ChangeRequest>(value).unwrap(), request);
    }

    #[test]
    fn delete_records_carry_only_the_id() {
        let value = serde_json::to_value(NotebookChange::StyleDeleted { style_id: 12 }).unwrap();
        assert_eq!(value, json!({ "type": "styleDeleted", "styleId": 12 }));
    }

    #[test]
    fn insert_thought_position_is_optional_on_the_wire() {
        let request: ChangeRequest = serde_json::from_value(json!({ "type": "insertThought" })).unwrap();
        assert_eq!(request, ChangeRequest::InsertThought { position: None });
    }

    #[test]
    fn deletion_classification() {
        assert!(NotebookChange::ThoughtDeleted { thought_id: 1 }.is_deletion());
        assert!(NotebookChange::RelationshipDeleted { relationship_id: 1 }.is_deletion());
        let inserted = NotebookChange::ThoughtInserted { thought: Thought { id: 5, position: None } };
        assert!(!inserted.is_deletion());
        assert_eq!(inserted.entity_id(), 5);
        assert_eq!(inserted.kind(), "thoughtInserted");
    }

    #[test]
    fn kind_matches_wire_tag() {
        let request = ChangeRequest::DeleteRelationship { relationship_id: 3 };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], request.kind());
    }
}
