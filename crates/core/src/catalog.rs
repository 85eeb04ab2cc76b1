// Integration directory and tool catalog collaborators

use crate::types::{Integration, IntegrationId, Tool};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;

/// Source of the integrations known to the platform
#[async_trait::async_trait]
pub trait IntegrationDirectory: Send + Sync {
    /// List every integration, in a stable enumeration order
    async fn list_integrations(&self) -> Result<Vec<Integration>>;
}

/// Tools exposed by integrations and their execution
#[async_trait::async_trait]
pub trait ToolCatalog: Send + Sync {
    /// Get the tools owned by an integration
    async fn get_tools(&self, integration_id: &IntegrationId) -> Result<Vec<Tool>>;

    /// Execute a tool with the given arguments
    async fn execute_tool(
        &self,
        integration_id: &IntegrationId,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> Result<Value>;
}

/// A tool entry of the static catalog, with an optional canned response
#[derive(Debug, Clone)]
pub struct CatalogTool {
    pub tool: Tool,
    pub response: Option<Value>,
}

impl From<Tool> for CatalogTool {
    fn from(tool: Tool) -> Self {
        Self {
            tool,
            response: None,
        }
    }
}

/// In-process catalog seeded from configuration.
///
/// Implements both [`IntegrationDirectory`] and [`ToolCatalog`]. Tools without a
/// canned response echo their invocation back.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: Vec<(Integration, Vec<CatalogTool>)>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    integrations: Vec<IntegrationEntry>,
}

#[derive(Debug, Deserialize)]
struct IntegrationEntry {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    base_url: String,
    #[serde(default)]
    tools: Vec<ToolEntry>,
}

#[derive(Debug, Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    input_schema: Option<Value>,
    #[serde(default)]
    response: Option<Value>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an integration with its tools
    pub fn with_integration(
        mut self,
        integration: Integration,
        tools: impl IntoIterator<Item = impl Into<CatalogTool>>,
    ) -> Self {
        self.entries
            .push((integration, tools.into_iter().map(Into::into).collect()));
        self
    }

    /// Parse a catalog from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(content).context("Failed to parse catalog")?;

        let entries = file
            .integrations
            .into_iter()
            .map(|entry| {
                let integration = Integration::new(entry.id, entry.name)
                    .with_description(entry.description)
                    .with_base_url(entry.base_url);
                let tools = entry
                    .tools
                    .into_iter()
                    .map(|t| {
                        let mut tool = Tool::new(t.name, t.description);
                        if let Some(schema) = t.input_schema {
                            tool = tool.with_input_schema(schema);
                        }
                        CatalogTool {
                            tool,
                            response: t.response,
                        }
                    })
                    .collect();
                (integration, tools)
            })
            .collect();

        Ok(Self { entries })
    }

    /// Load a catalog from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog file {}", path.display()))?;
        let catalog = Self::from_toml_str(&content)?;

        tracing::info!(
            "Loaded catalog from {}: {} integrations, {} tools",
            path.display(),
            catalog.entries.len(),
            catalog.tool_count()
        );

        Ok(catalog)
    }

    /// Total number of tools across all integrations
    pub fn tool_count(&self) -> usize {
        self.entries.iter().map(|(_, tools)| tools.len()).sum()
    }

    fn find(&self, integration_id: &IntegrationId) -> Result<&(Integration, Vec<CatalogTool>)> {
        self.entries
            .iter()
            .find(|(integration, _)| integration.id == *integration_id)
            .ok_or_else(|| anyhow::anyhow!("Integration {} not found", integration_id))
    }
}

#[async_trait::async_trait]
impl IntegrationDirectory for StaticCatalog {
    async fn list_integrations(&self) -> Result<Vec<Integration>> {
        Ok(self
            .entries
            .iter()
            .map(|(integration, _)| integration.clone())
            .collect())
    }
}

#[async_trait::async_trait]
impl ToolCatalog for StaticCatalog {
    async fn get_tools(&self, integration_id: &IntegrationId) -> Result<Vec<Tool>> {
        let (_, tools) = self.find(integration_id)?;
        Ok(tools.iter().map(|t| t.tool.clone()).collect())
    }

    async fn execute_tool(
        &self,
        integration_id: &IntegrationId,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> Result<Value> {
        let (integration, tools) = self.find(integration_id)?;
        let entry = tools
            .iter()
            .find(|t| t.tool.name == tool_name)
            .ok_or_else(|| {
                anyhow::anyhow!("Tool {} not found in integration {}", tool_name, integration.name)
            })?;

        tracing::debug!("Executing catalog tool {} on {}", tool_name, integration.name);

        Ok(match &entry.response {
            Some(response) => response.clone(),
            None => serde_json::json!({
                "integration_id": integration.id,
                "tool": tool_name,
                "arguments": arguments,
            }),
        })
    }
}
