use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::ServerConfig;
use crate::engine::notebook::BatchLimits;
use crate::engine::registry::NotebookRegistry;
use crate::tools::ToolRegistry;

/// Shared by every connection the endpoint accepts.
#[derive(Clone)]
pub struct ServerState {
    notebooks: Arc<RwLock<NotebookRegistry>>,
    tools: Arc<ToolRegistry>,
    limits: BatchLimits,
}

impl ServerState {
    pub fn new(config: &ServerConfig) -> Self {
        let config = config.clone().normalized();
        Self {
            notebooks: Arc::new(RwLock::new(NotebookRegistry::new())),
            tools: Arc::new(ToolRegistry::with_builtin_tools()),
            limits: BatchLimits {
                max_batch_requests: config.max_batch_requests,
                max_changes_per_message: config.max_changes_per_message,
            },
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn notebooks(&self) -> &Arc<RwLock<NotebookRegistry>> {
        &self.notebooks
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn limits(&self) -> BatchLimits {
        self.limits
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new(&ServerConfig::default())
    }
}
