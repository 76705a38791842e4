// Server configuration file.
//
// Location: `~/.mathnote/server.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7878";
pub const DEFAULT_MAX_CHANGES_PER_MESSAGE: usize = 64;
pub const DEFAULT_MAX_BATCH_REQUESTS: usize = 256;
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Root directory for mathnote state: `~/.mathnote/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".mathnote"))
}

/// Path to the server config file: `~/.mathnote/server.toml`.
pub fn server_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("server.toml"))
}

// ── Server config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the WebSocket endpoint binds to.
    pub listen_addr: String,
    /// Records per `notebookChanged` message before a batch is split.
    pub max_changes_per_message: usize,
    /// Requests accepted in one `changeNotebook` batch.
    pub max_batch_requests: usize,
    /// Default `tracing` filter; `RUST_LOG` takes precedence.
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.into(),
            max_changes_per_message: DEFAULT_MAX_CHANGES_PER_MESSAGE,
            max_batch_requests: DEFAULT_MAX_BATCH_REQUESTS,
            log_filter: DEFAULT_LOG_FILTER.into(),
        }
    }
}

impl ServerConfig {
    /// Load from `~/.mathnote/server.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        server_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }

    /// Zero limits would stall batches, so they are raised to one.
    pub fn normalized(mut self) -> Self {
        self.max_changes_per_message = self.max_changes_per_message.max(1);
        self.max_batch_requests = self.max_batch_requests.max(1);
        self
    }
}

// ── Errors ─────────────────────────────────────────────────────────

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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn server_config_defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr, "127.0.0.1:7878");
        assert_eq!(cfg.max_changes_per_message, 64);
        assert_eq!(cfg.max_batch_requests, 256);
        assert_eq!(cfg.log_filter, "info");
    }

    #[test]
    fn server_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.toml");

        let cfg = ServerConfig {
            listen_addr: "0.0.0.0:9000".into(),
            max_changes_per_message: 8,
            max_batch_requests: 32,
            log_filter: "mathnote_server=debug".into(),
        };
        cfg.save_to(&path).unwrap();
        let loaded = ServerConfig::load_from(&path).unwrap();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn server_config_partial_toml_uses_defaults() {
        let toml_str = r#"
listen_addr = "127.0.0.1:0"
max_changes_per_message = 1
"#;
        let cfg: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:0");
        assert_eq!(cfg.max_changes_per_message, 1);
        assert_eq!(cfg.max_batch_requests, DEFAULT_MAX_BATCH_REQUESTS); // default
    }

    #[test]
    fn server_config_load_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = ServerConfig::load_from(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn server_config_rejects_wrong_types() {
        assert!(toml::from_str::<ServerConfig>("max_batch_requests = \"many\"").is_err());
    }

    #[test]
    fn normalized_raises_zero_limits() {
        let cfg = ServerConfig { max_changes_per_message: 0, max_batch_requests: 0, ..Default::default() }
            .normalized();
        assert_eq!(cfg.max_changes_per_message, 1);
        assert_eq!(cfg.max_batch_requests, 1);
    }

    #[test]
    fn server_config_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(".mathnote").join("server.toml");
        ServerConfig::default().save_to(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn global_dir_is_under_home() {
        if let Some(dir) = global_dir() {
            assert!(dir.ends_with(".mathnote"));
        }
    }
}
