use std::time::Duration;

use mathnote_common::protocol::ws::{ProtocolError, TrackerToken};
use mathnote_common::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to `{url}`: {source}")]
    Connect {
        url: String,
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
    #[error("channel is not open")]
    ChannelClosed,
    #[error("tracked request {tracker} did not complete within {after:?}")]
    Timeout { tracker: TrackerToken, after: Duration },
    #[error("timed out after {0:?}")]
    WaitTimeout(Duration),
    #[error("server rejected the change ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("mirror diverged from server: {0}")]
    Mirror(#[from] StoreError),
}

impl ClientError {
    /// Wire code for rejections, if the server sent one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } => Some(code),
            _ => None,
        }
    }
}
