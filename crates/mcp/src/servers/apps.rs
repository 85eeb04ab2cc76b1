// Apps server: the tools of an allow-listed set of integrations, exposed directly

use crate::backend::Backend;
use crate::error::{McpError, McpResult};
use crate::protocol::{
    InitializeParams, InitializeResult, ResourceDescriptor, ServerInfo, ToolDescriptor,
};
use crate::server::{Lifecycle, McpServer, ServerVariant};
use crate::servers::OVERRIDE_OWNER_KEY;
use conduit_core::Integration;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

const SERVER_NAME: &str = "conduit-apps-mcp";
const APP_SCHEME: &str = "app://";

/// Server exposing the tools of the configured apps.
///
/// The tool cache is loaded on `initialize` and on [`AppsServer::refresh_tools`],
/// and replaced as a whole so concurrent calls always see a complete snapshot.
pub struct AppsServer {
    backend: Backend,
    linked_account_owner_id: String,
    allowed_apps: Vec<String>,
    tools: RwLock<Arc<Vec<ToolDescriptor>>>,
    lifecycle: Lifecycle,
}

impl AppsServer {
    pub fn new(backend: Backend, linked_account_owner_id: String, allowed_apps: Vec<String>) -> Self {
        Self {
            backend,
            linked_account_owner_id,
            allowed_apps,
            tools: RwLock::new(Arc::new(Vec::new())),
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn allowed_apps(&self) -> &[String] {
        &self.allowed_apps
    }

    /// Number of tools currently cached
    pub async fn tool_count(&self) -> usize {
        self.tools.read().await.len()
    }

    /// Reload the tool cache from the allowed apps
    pub async fn refresh_tools(&self) -> McpResult<()> {
        self.lifecycle.ensure_initialized().await?;

        tracing::info!("Refreshing tools from allowed apps");
        self.load_tools().await
    }

    fn is_allowed(&self, name: &str) -> bool {
        self.allowed_apps
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(name))
    }

    async fn allowed_integrations(&self) -> McpResult<Vec<Integration>> {
        Ok(self
            .backend
            .list_integrations()
            .await?
            .into_iter()
            .filter(|integration| self.is_allowed(&integration.name))
            .collect())
    }

    async fn load_tools(&self) -> McpResult<()> {
        tracing::debug!(apps = ?self.allowed_apps, "Loading tools from allowed apps");

        let integrations = self.allowed_integrations().await?;

        let mut loaded: Vec<ToolDescriptor> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for integration in &integrations {
            let tools = match self.backend.get_tools(&integration.id).await {
                Ok(tools) => tools,
                Err(e) => {
                    tracing::warn!(
                        integration = %integration.id,
                        app = %integration.name,
                        "Failed to get tools for integration: {}",
                        e
                    );
                    continue;
                }
            };

            tracing::debug!(app = %integration.name, count = tools.len(), "Loaded tools from app");

            for tool in tools {
                if seen.insert(tool.name.clone()) {
                    loaded.push(tool.into());
                } else {
                    tracing::warn!(
                        tool = %tool.name,
                        app = %integration.name,
                        "Duplicate tool name, keeping the first occurrence"
                    );
                }
            }
        }

        for app in &self.allowed_apps {
            if !integrations.iter().any(|i| i.name.eq_ignore_ascii_case(app)) {
                tracing::warn!(app = %app, "Requested app not found");
            }
        }

        tracing::info!(
            total = loaded.len(),
            apps = ?self.allowed_apps,
            "Loaded tools from apps"
        );

        *self.tools.write().await = Arc::new(loaded);
        Ok(())
    }

    async fn snapshot(&self) -> Arc<Vec<ToolDescriptor>> {
        self.tools.read().await.clone()
    }
}

#[async_trait::async_trait]
impl McpServer for AppsServer {
    fn variant(&self) -> ServerVariant {
        ServerVariant::Apps
    }

    async fn initialize(&self, _params: InitializeParams) -> McpResult<InitializeResult> {
        tracing::info!(
            linked_owner = %self.linked_account_owner_id,
            apps = ?self.allowed_apps,
            "Initializing apps MCP server"
        );

        self.lifecycle.ensure_not_shut_down().await?;
        self.load_tools().await?;
        self.lifecycle.mark_initialized().await?;

        Ok(InitializeResult::new(
            ServerInfo::new(SERVER_NAME).with("allowedApps", self.allowed_apps.clone()),
        ))
    }

    async fn list_tools(&self) -> McpResult<Vec<ToolDescriptor>> {
        self.lifecycle.ensure_initialized().await?;
        Ok(self.snapshot().await.as_ref().clone())
    }

    async fn call_tool(&self, name: &str, mut arguments: Map<String, Value>) -> McpResult<Value> {
        self.lifecycle.ensure_initialized().await?;

        let owner = match arguments.remove(OVERRIDE_OWNER_KEY) {
            Some(Value::String(id)) if !id.is_empty() => {
                tracing::debug!("Using overridden linked account owner ID {}", id);
                id
            }
            _ => self.linked_account_owner_id.clone(),
        };

        let cached = self.snapshot().await;
        if !cached.iter().any(|t| t.name == name) {
            return Err(McpError::ToolNotFound {
                name: name.to_string(),
                available: cached.iter().map(|t| t.name.clone()).collect(),
            });
        }

        for integration in self.allowed_integrations().await? {
            let tools = match self.backend.get_tools(&integration.id).await {
                Ok(tools) => tools,
                Err(e) if e.is_interrupted() => return Err(e),
                Err(e) => {
                    tracing::debug!(integration = %integration.id, "Skipping integration: {}", e);
                    continue;
                }
            };
            if !tools.iter().any(|t| t.name == name) {
                continue;
            }

            tracing::info!(
                tool = %name,
                integration = %integration.id,
                app = %integration.name,
                linked_owner = %owner,
                "Executing tool"
            );

            let result = self
                .backend
                .execute_tool(&integration.id, name, arguments)
                .await?;

            return Ok(json!({
                "success": true,
                "tool_name": name,
                "result": result,
                "integration": integration.name,
                "app": integration.name,
            }));
        }

        Err(McpError::ToolOwnerNotFound {
            name: name.to_string(),
        })
    }

    async fn list_resources(&self) -> McpResult<Vec<ResourceDescriptor>> {
        self.lifecycle.ensure_initialized().await?;

        let resources: Vec<ResourceDescriptor> = self
            .allowed_integrations()
            .await?
            .into_iter()
            .map(|integration| ResourceDescriptor {
                uri: format!("{}{}", APP_SCHEME, integration.name),
                description: format!("{} integration resources", integration.name),
                name: integration.name,
                mime_type: "application/json".to_string(),
            })
            .collect();

        tracing::debug!("Returning {} apps MCP resources", resources.len());
        Ok(resources)
    }

    async fn read_resource(&self, uri: &str) -> McpResult<Value> {
        self.lifecycle.ensure_initialized().await?;

        let app = uri
            .strip_prefix(APP_SCHEME)
            .ok_or_else(|| McpError::InvalidUri {
                uri: uri.to_string(),
                expected: "app://appname",
            })?;

        if !self.is_allowed(app) {
            return Err(McpError::AppNotAllowed {
                app: app.to_string(),
                allowed: self.allowed_apps.clone(),
            });
        }

        // Tools are not partitioned by app; the whole cache is returned.
        let tools = self.snapshot().await;

        Ok(json!({
            "uri": uri,
            "app": app,
            "toolCount": tools.len(),
            "tools": tools.as_ref(),
            "mimeType": "application/json",
            "allowedApps": self.allowed_apps,
        }))
    }

    async fn shutdown(&self) -> McpResult<()> {
        tracing::info!("Shutting down apps MCP server");
        self.lifecycle.mark_shutdown().await;
        *self.tools.write().await = Arc::new(Vec::new());
        Ok(())
    }
}
