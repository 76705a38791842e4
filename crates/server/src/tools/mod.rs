// Server-side tools: `useTool` requests are expanded here into ordinary change
// requests against the batch being staged.

use std::collections::HashMap;
use std::sync::Arc;

use mathnote_common::change::{ChangeRequest, NotebookChange};
use mathnote_common::model::{
    RelationshipRole, Style, StyleData, StyleId, StyleProps, StyleRole, StyleSource, ThoughtId,
    ToolInfo,
};
use mathnote_common::protocol::ws::{TOOL_FAILED, UNKNOWN_TOOL};
use mathnote_common::store::{EntityStore, StoreError};
use serde_json::Value;
use thiserror::Error;

pub const INSERT_FORMULA_TOOL: &str = "insert-formula";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("style {0} is not a tool")]
    NotATool(StyleId),
    #[error("no handler registered for tool `{0}`")]
    UnknownTool(String),
    #[error("tool `{name}` failed: {reason}")]
    Failed { name: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ToolError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotATool(_) | Self::Failed { .. } => TOOL_FAILED,
            Self::UnknownTool(_) => UNKNOWN_TOOL,
            Self::Store(error) => error.code(),
        }
    }
}

/// Staged store a tool submits its requests against. Each request is applied
/// immediately so later requests can reference ids the earlier ones created.
pub struct ToolContext<'a> {
    store: &'a mut EntityStore,
    changes: Vec<NotebookChange>,
}

impl<'a> ToolContext<'a> {
    pub fn new(store: &'a mut EntityStore) -> Self {
        Self { store, changes: Vec::new() }
    }

    pub fn store(&self) -> &EntityStore {
        self.store
    }

    /// Applies one request and returns the records it produced.
    pub fn submit(&mut self, request: &ChangeRequest) -> Result<&[NotebookChange], ToolError> {
        let start = self.changes.len();
        let records = self.store.apply_request(request)?;
        self.changes.extend(records);
        Ok(&self.changes[start..])
    }

    pub fn insert_thought(&mut self) -> Result<ThoughtId, ToolError> {
        let records = self.submit(&ChangeRequest::InsertThought { position: None })?;
        match records.first() {
            Some(NotebookChange::ThoughtInserted { thought }) => Ok(thought.id),
            _ => Err(StoreError::InvariantViolated("insertThought produced no thought".into()).into()),
        }
    }

    pub fn insert_style(&mut self, props: StyleProps) -> Result<StyleId, ToolError> {
        let records = self.submit(&ChangeRequest::insert_style(props))?;
        match records.first() {
            Some(NotebookChange::StyleInserted { style }) => Ok(style.id),
            _ => Err(StoreError::InvariantViolated("insertStyle produced no style".into()).into()),
        }
    }

    pub fn into_changes(self) -> Vec<NotebookChange> {
        self.changes
    }
}

pub trait ToolHandler: Send + Sync {
    /// Runs the tool attached as `tool`. Requests submitted through `cx` become
    /// part of the invoking batch and are rolled back with it on error.
    fn run(&self, tool: &Style, info: &ToolInfo, cx: &mut ToolContext<'_>) -> Result<(), ToolError>;
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the tools every server ships.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.register(INSERT_FORMULA_TOOL, InsertFormulaTool);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, handler: impl ToolHandler + 'static) {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Expands a `useTool` request for `style_id` into `cx`.
    pub fn use_tool(&self, style_id: StyleId, cx: &mut ToolContext<'_>) -> Result<(), ToolError> {
        let tool = cx.store().style(style_id).cloned().ok_or(StoreError::NotFound(style_id))?;
        let StyleData::ToolInfo(info) = &tool.data else {
            return Err(ToolError::NotATool(style_id));
        };
        let handler = self
            .handlers
            .get(&info.name)
            .ok_or_else(|| ToolError::UnknownTool(info.name.clone()))?;
        handler.run(&tool, info, cx)
    }
}

/// Inserts a new thought holding the tool's LaTeX payload as a formula, linked
/// back to the stylable the tool was attached to.
///
/// The payload is either a LaTeX string or `{"latex": "..."}`.
pub struct InsertFormulaTool;

impl ToolHandler for InsertFormulaTool {
    fn run(&self, tool: &Style, info: &ToolInfo, cx: &mut ToolContext<'_>) -> Result<(), ToolError> {
        let latex = match &info.payload {
            Value::String(latex) => latex.clone(),
            Value::Object(fields) => match fields.get("latex").and_then(Value::as_str) {
                Some(latex) => latex.to_owned(),
                None => return Err(failed(info, "payload object has no `latex` string")),
            },
            _ => return Err(failed(info, "payload must be a LaTeX string")),
        };
        if latex.trim().is_empty() {
            return Err(failed(info, "payload is empty"));
        }

        let thought_id = cx.insert_thought()?;
        let formula_id = cx.insert_style(StyleProps::new(
            thought_id,
            StyleRole::Formula,
            StyleSource::System,
            StyleData::Latex(latex),
        ))?;
        cx.submit(&ChangeRequest::InsertRelationship {
            from_id: tool.stylable_id,
            to_id: formula_id,
            role: RelationshipRole::Transformation,
        })?;
        Ok(())
    }
}

fn failed(info: &ToolInfo, reason: &str) -> ToolError {
    ToolError::Failed { name: info.name.clone(), reason: reason.to_owned() }
}
