// Notebook entity types: thoughts, styles and relationships.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a thought, style or relationship.
///
/// A notebook hands these out from a single counter, so a style id never
/// collides with a thought id and any id resolves without knowing its kind.
pub type EntityId = u64;
pub type ThoughtId = EntityId;
pub type StyleId = EntityId;
pub type RelationshipId = EntityId;
/// Anything a style can attach to: a thought or another style.
pub type StylableId = EntityId;

/// Page placement of a thought.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ThoughtPosition {
    pub page: u32,
    pub offset: u32,
}

/// Top-level cell of a notebook. Carries identity only; content lives in styles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Thought {
    pub id: ThoughtId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<ThoughtPosition>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum StyleRole {
    Formula,
    Hint,
    Text,
    Representation,
    Evaluation,
    Tool,
    Figure,
    Plot,
    Handwriting,
    Decoration,
}

/// Subsystem that produced a style.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum StyleSource {
    User,
    System,
    Latex,
    Mathematica,
    Myscript,
    Test,
}

/// A single pen stroke, as parallel coordinate arrays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stroke {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
}

/// Payload of a `TOOL-INFO` style: a button a view can render and invoke.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    /// Key into the server's tool registry.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

/// Style payload, keyed by its `type`.
///
/// Serialized adjacently tagged so a style reads `{"type": "LATEX", "data": "x^2"}`
/// on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING-KEBAB-CASE")]
pub enum StyleData {
    Latex(String),
    Mathml(String),
    WolframExpression(String),
    Svg(String),
    Html(String),
    Text(String),
    Jiix(Value),
    Strokes(Vec<Stroke>),
    ToolInfo(ToolInfo),
    Boolean(bool),
}

/// Payload encoding of a style, without the payload itself.
///
/// Renderer registries on the view side are keyed by this enum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum StyleType {
    Latex,
    Mathml,
    WolframExpression,
    Svg,
    Html,
    Text,
    Jiix,
    Strokes,
    ToolInfo,
    Boolean,
}

impl StyleType {
    pub const ALL: &'static [StyleType] = &[
        Self::Latex,
        Self::Mathml,
        Self::WolframExpression,
        Self::Svg,
        Self::Html,
        Self::Text,
        Self::Jiix,
        Self::Strokes,
        Self::ToolInfo,
        Self::Boolean,
    ];
}

impl StyleData {
    pub fn style_type(&self) -> StyleType {
        match self {
            Self::Latex(_) => StyleType::Latex,
            Self::Mathml(_) => StyleType::Mathml,
            Self::WolframExpression(_) => StyleType::WolframExpression,
            Self::Svg(_) => StyleType::Svg,
            Self::Html(_) => StyleType::Html,
            Self::Text(_) => StyleType::Text,
            Self::Jiix(_) => StyleType::Jiix,
            Self::Strokes(_) => StyleType::Strokes,
            Self::ToolInfo(_) => StyleType::ToolInfo,
            Self::Boolean(_) => StyleType::Boolean,
        }
    }
}

/// Everything needed to create a style; the server assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StyleProps {
    pub stylable_id: StylableId,
    pub role: StyleRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subrole: Option<String>,
    pub source: StyleSource,
    #[serde(flatten)]
    pub data: StyleData,
}

impl StyleProps {
    pub fn new(stylable_id: StylableId, role: StyleRole, source: StyleSource, data: StyleData) -> Self {
        Self { stylable_id, role, subrole: None, source, data }
    }

    pub fn with_subrole(mut self, subrole: impl Into<String>) -> Self {
        self.subrole = Some(subrole.into());
        self
    }
}

/// Annotation attached to a thought or another style.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Style {
    pub id: StyleId,
    pub stylable_id: StylableId,
    pub role: StyleRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subrole: Option<String>,
    pub source: StyleSource,
    #[serde(flatten)]
    pub data: StyleData,
}

impl Style {
    pub fn from_props(id: StyleId, props: StyleProps) -> Self {
        Self {
            id,
            stylable_id: props.stylable_id,
            role: props.role,
            subrole: props.subrole,
            source: props.source,
            data: props.data,
        }
    }

    pub fn props(&self) -> StyleProps {
        StyleProps {
            stylable_id: self.stylable_id,
            role: self.role,
            subrole: self.subrole.clone(),
            source: self.source,
            data: self.data.clone(),
        }
    }

    pub fn style_type(&self) -> StyleType {
        self.data.style_type()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum RelationshipRole {
    Equivalence,
    Transformation,
    Duplicate,
    Inconsistency,
}

/// Directed edge between two stylables, independent of the style tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub id: RelationshipId,
    pub from_id: StylableId,
    pub to_id: StylableId,
    pub role: RelationshipRole,
}
