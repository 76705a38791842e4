// WebSocket envelopes for the mathnote-sync.v1 protocol.
//
// Client envelopes are discriminated by `action`, server envelopes by `type`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::change::{ChangeRequest, NotebookChange};
use crate::model::StyleId;
use crate::store::NotebookSnapshot;

pub const CURRENT_PROTOCOL_VERSION: &str = "mathnote-sync.v1";
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[CURRENT_PROTOCOL_VERSION];

/// Correlates a request batch with the records it produced. Unique per
/// client session.
pub type TrackerToken = u64;

pub const CLIENT_DISCRIMINANT: &str = "action";
pub const SERVER_DISCRIMINANT: &str = "type";

pub const CLIENT_ACTIONS: &[&str] =
    &["openNotebook", "closeNotebook", "changeNotebook", "useTool", "refreshNotebook"];
pub const SERVER_MESSAGE_TYPES: &[&str] =
    &["notebookOpened", "notebookClosed", "notebookChanged", "changeFailed", "error"];

// Error codes carried by `changeFailed` and `error`. Store failures use
// `StoreError::code`.
pub const MALFORMED_MESSAGE: &str = "MALFORMED_MESSAGE";
pub const UNKNOWN_ACTION: &str = "UNKNOWN_ACTION";
pub const NOTEBOOK_NOT_OPEN: &str = "NOTEBOOK_NOT_OPEN";
pub const BATCH_TOO_LARGE: &str = "BATCH_TOO_LARGE";
pub const UNKNOWN_TOOL: &str = "UNKNOWN_TOOL";
pub const TOOL_FAILED: &str = "TOOL_FAILED";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker: Option<TrackerToken>,
    /// Ask the server for inverse requests alongside the records.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub want_undo: bool,
}

/// Client -> Server envelopes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Subscribe to a notebook and request its snapshot.
    OpenNotebook { notebook_path: String },

    /// Stop receiving changes for a notebook.
    CloseNotebook { notebook_path: String },

    /// Submit a batch of change requests, applied atomically.
    ChangeNotebook {
        notebook_path: String,
        change_requests: Vec<ChangeRequest>,
        #[serde(default)]
        options: ChangeOptions,
    },

    /// Invoke a tool style outside of a larger batch.
    UseTool {
        notebook_path: String,
        style_id: StyleId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tracker: Option<TrackerToken>,
    },

    /// Re-send snapshots for every notebook this connection has open.
    RefreshNotebook,
}

/// Server -> Client envelopes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    NotebookOpened { notebook_path: String, snapshot: NotebookSnapshot },

    NotebookClosed { notebook_path: String },

    /// Records from one accepted batch. A batch may span several messages;
    /// the last one has `complete` set and carries the undo requests.
    NotebookChanged {
        notebook_path: String,
        changes: Vec<NotebookChange>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tracker: Option<TrackerToken>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        complete: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        undo_change_requests: Vec<ChangeRequest>,
    },

    /// A batch was rejected. Sent to the submitting connection only.
    ChangeFailed {
        notebook_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tracker: Option<TrackerToken>,
        code: String,
        message: String,
    },

    /// Connection-level problem that is not tied to a batch.
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn notebook_path(&self) -> Option<&str> {
        match self {
            Self::NotebookOpened { notebook_path, .. }
            | Self::NotebookClosed { notebook_path }
            | Self::NotebookChanged { notebook_path, .. }
            | Self::ChangeFailed { notebook_path, .. } => Some(notebook_path),
            Self::Error { .. } => None,
        }
    }

    pub fn tracker(&self) -> Option<TrackerToken> {
        match self {
            Self::NotebookChanged { tracker, .. } | Self::ChangeFailed { tracker, .. } => *tracker,
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("unknown message discriminant `{0}`")]
    UnknownDiscriminant(String),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownDiscriminant(_) => UNKNOWN_ACTION,
            Self::MalformedMessage(_) | Self::Encode(_) => MALFORMED_MESSAGE,
        }
    }
}

pub fn decode_client_message(raw: &[u8]) -> Result<ClientMessage, ProtocolError> {
    decode_tagged(raw, CLIENT_DISCRIMINANT, CLIENT_ACTIONS)
}

pub fn decode_server_message(raw: &[u8]) -> Result<ServerMessage, ProtocolError> {
    decode_tagged(raw, SERVER_DISCRIMINANT, SERVER_MESSAGE_TYPES)
}

pub fn encode_message<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Parses an envelope, telling an unknown discriminant apart from a shape error
/// so callers can log them differently.
fn decode_tagged<T: DeserializeOwned>(
    raw: &[u8],
    discriminant: &str,
    known: &[&str],
) -> Result<T, ProtocolError> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|error| ProtocolError::MalformedMessage(error.to_string()))?;

    match value.get(discriminant).and_then(Value::as_str) {
        Some(tag) if !known.contains(&tag) => {
            return Err(ProtocolError::UnknownDiscriminant(tag.to_string()));
        }
        Some(_) => {}
        None => {
            return Err(ProtocolError::MalformedMessage(format!(
                "missing string `{discriminant}` field"
            )));
        }
    }

    serde_json::from_value(value).map_err(|error| ProtocolError::MalformedMessage(error.to_string()))
}
