// Client configuration file.
//
// Location: `~/.mathnote/client.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:7878/notebooks";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Path to the client config file: `~/.mathnote/client.toml`.
pub fn client_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".mathnote").join("client.toml"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint of the notebook server.
    pub server_url: Url,
    /// Default timeout for tracked requests.
    pub request_timeout_ms: u64,
    /// Notebooks opened as soon as the channel is open.
    pub open_notebooks: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            open_notebooks: Vec::new(),
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: Url) -> Self {
        Self { server_url, ..Self::default() }
    }

    pub fn with_notebook(mut self, path: impl Into<String>) -> Self {
        self.open_notebooks.push(path.into());
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Load from `~/.mathnote/client.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        client_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

fn default_server_url() -> Url {
    match Url::parse(DEFAULT_SERVER_URL) {
        Ok(url) => url,
        Err(_) => unreachable!("default server url is valid"),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
