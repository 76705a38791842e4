// mathnote-client: mirrors server notebooks and tracks the changes a request
// batch produces.

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod mirror;
pub mod tracker;

pub use client::NotebookClient;
pub use error::ClientError;
