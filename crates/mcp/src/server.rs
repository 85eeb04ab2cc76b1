// MCP server abstraction shared by the unified and apps variants

use crate::backend::Backend;
use crate::error::{McpError, McpResult};
use crate::manager::ServerConfig;
use crate::protocol::{InitializeParams, InitializeResult, ResourceDescriptor, ToolDescriptor};
use crate::servers::{AppsServer, UnifiedServer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Which capability surface a server exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerVariant {
    /// Two meta-tools proxying to every integration
    Unified,
    /// The tools of an allow-listed set of apps, exposed directly
    Apps,
}

impl std::fmt::Display for ServerVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerVariant::Unified => f.write_str("unified"),
            ServerVariant::Apps => f.write_str("apps"),
        }
    }
}

impl std::str::FromStr for ServerVariant {
    type Err = McpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unified" => Ok(ServerVariant::Unified),
            "apps" => Ok(ServerVariant::Apps),
            other => Err(McpError::UnsupportedVariant(other.to_string())),
        }
    }
}

/// The capability set every server variant implements
#[async_trait::async_trait]
pub trait McpServer: Send + Sync {
    fn variant(&self) -> ServerVariant;

    async fn initialize(&self, params: InitializeParams) -> McpResult<InitializeResult>;

    async fn list_tools(&self) -> McpResult<Vec<ToolDescriptor>>;

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> McpResult<Value>;

    async fn list_resources(&self) -> McpResult<Vec<ResourceDescriptor>>;

    async fn read_resource(&self, uri: &str) -> McpResult<Value>;

    async fn shutdown(&self) -> McpResult<()>;
}

/// Protocol lifecycle state of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Uninitialized,
    Initialized,
    /// Terminal
    Shutdown,
}

/// Guards the `uninitialized → initialized → shutdown` state machine
#[derive(Debug)]
pub struct Lifecycle {
    state: RwLock<ServerState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ServerState::Uninitialized),
        }
    }

    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Fail unless the server is initialized
    pub async fn ensure_initialized(&self) -> McpResult<()> {
        match *self.state.read().await {
            ServerState::Initialized => Ok(()),
            _ => Err(McpError::NotInitialized),
        }
    }

    /// Fail if the server has already been shut down
    pub async fn ensure_not_shut_down(&self) -> McpResult<()> {
        match *self.state.read().await {
            ServerState::Shutdown => Err(McpError::ServerShutDown),
            _ => Ok(()),
        }
    }

    pub async fn mark_initialized(&self) -> McpResult<()> {
        let mut state = self.state.write().await;
        if *state == ServerState::Shutdown {
            return Err(McpError::ServerShutDown);
        }
        *state = ServerState::Initialized;
        Ok(())
    }

    pub async fn mark_shutdown(&self) {
        *self.state.write().await = ServerState::Shutdown;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the server variant named by `config`
pub fn build_server(config: &ServerConfig, backend: Backend) -> Arc<dyn McpServer> {
    match config.variant {
        ServerVariant::Unified => Arc::new(UnifiedServer::new(
            backend,
            config.linked_account_owner_id.clone(),
            config.allowed_apps_only,
        )),
        ServerVariant::Apps => Arc::new(AppsServer::new(
            backend,
            config.linked_account_owner_id.clone(),
            config.allowed_apps.clone(),
        )),
    }
}
