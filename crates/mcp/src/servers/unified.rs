// Unified server: two meta-tools proxying to every integration's tools

use crate::backend::Backend;
use crate::error::{McpError, McpResult};
use crate::protocol::{
    InitializeParams, InitializeResult, ResourceDescriptor, ServerInfo, ToolDescriptor,
};
use crate::server::{Lifecycle, McpServer, ServerVariant};
use crate::servers::{schema, OVERRIDE_OWNER_KEY};
use conduit_core::Tool;
use serde::Deserialize;
use serde_json::{json, Map, Value};

pub const SEARCH_FUNCTIONS: &str = "ACI_SEARCH_FUNCTIONS";
pub const EXECUTE_FUNCTION: &str = "ACI_EXECUTE_FUNCTION";

const SERVER_NAME: &str = "conduit-unified-mcp";

/// Server exposing `ACI_SEARCH_FUNCTIONS` and `ACI_EXECUTE_FUNCTION`
pub struct UnifiedServer {
    backend: Backend,
    linked_account_owner_id: String,
    allowed_apps_only: bool,
    lifecycle: Lifecycle,
}

#[derive(Debug, Default, Deserialize)]
struct SearchArgs {
    #[serde(default)]
    app_names: Vec<String>,
    #[serde(default)]
    query: String,
    // Accepted and echoed back; tools carry no category yet.
    #[serde(default)]
    category: String,
}

#[derive(Debug, Deserialize)]
struct ExecuteArgs {
    function_name: String,
    function_arguments: Map<String, Value>,
    #[serde(default, rename = "override_linked_account_owner_id")]
    owner_override: Option<String>,
}

impl UnifiedServer {
    pub fn new(backend: Backend, linked_account_owner_id: String, allowed_apps_only: bool) -> Self {
        Self {
            backend,
            linked_account_owner_id,
            allowed_apps_only,
            lifecycle: Lifecycle::new(),
        }
    }

    /// The two meta-tool descriptors, independent of the integration pool
    pub fn meta_tools() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor {
                name: SEARCH_FUNCTIONS.to_string(),
                description: "Search for available functions in the platform. Use this to discover \
                    what tools and capabilities are available before executing them."
                    .to_string(),
                input_schema: schema::object(
                    json!({
                        "app_names": schema::array(
                            schema::string("An app name"),
                            "Optional list of specific app names to search within (e.g., ['GMAIL', 'SLACK']). \
                             If not provided, searches all available apps.",
                        ),
                        "query": schema::string(
                            "Optional search query to filter functions by name or description",
                        ),
                        "category": schema::string(
                            "Optional category filter (e.g., 'communication', 'productivity', 'data')",
                        ),
                    }),
                    vec![],
                ),
            },
            ToolDescriptor {
                name: EXECUTE_FUNCTION.to_string(),
                description: format!(
                    "Execute a specific function that was discovered using {}. This is the \
                     universal execution method for all platform capabilities.",
                    SEARCH_FUNCTIONS
                ),
                input_schema: schema::object(
                    json!({
                        "function_name": schema::string(
                            "The exact name of the function to execute (obtained from ACI_SEARCH_FUNCTIONS)",
                        ),
                        "function_arguments": {
                            "type": "object",
                            "description": "The arguments to pass to the function, structured according to the function's input schema",
                        },
                        OVERRIDE_OWNER_KEY: schema::string(
                            "Optional: Override the default linked account owner ID for multi-user scenarios",
                        ),
                    }),
                    vec!["function_name", "function_arguments"],
                ),
            },
        ]
    }

    async fn search_functions(&self, arguments: Map<String, Value>) -> McpResult<Value> {
        let args: SearchArgs = serde_json::from_value(Value::Object(arguments))
            .map_err(|e| McpError::InvalidArguments(format!("{}: {}", SEARCH_FUNCTIONS, e)))?;

        let integrations = self.backend.list_integrations().await?;

        let mut functions: Vec<Tool> = Vec::new();
        for integration in integrations {
            if !args.app_names.is_empty() && !args.app_names.contains(&integration.name) {
                continue;
            }

            let tools = match self.backend.get_tools(&integration.id).await {
                Ok(tools) => tools,
                Err(e) => {
                    tracing::warn!(
                        integration = %integration.id,
                        "Failed to get tools for integration: {}",
                        e
                    );
                    continue;
                }
            };

            functions.extend(
                tools
                    .into_iter()
                    .filter(|tool| matches_query(tool, &args.query)),
            );
        }

        tracing::info!(
            total = functions.len(),
            app_names = ?args.app_names,
            "Search functions completed"
        );

        Ok(json!({
            "total": functions.len(),
            "functions": functions,
            "query": args.query,
            "app_names": args.app_names,
            "category": args.category,
        }))
    }

    async fn execute_function(&self, arguments: Map<String, Value>) -> McpResult<Value> {
        let args: ExecuteArgs = serde_json::from_value(Value::Object(arguments))
            .map_err(|e| McpError::InvalidArguments(format!("{}: {}", EXECUTE_FUNCTION, e)))?;

        let owner = match args.owner_override.as_deref() {
            Some(id) if !id.is_empty() => {
                tracing::debug!("Using overridden linked account owner ID {}", id);
                id
            }
            _ => self.linked_account_owner_id.as_str(),
        };

        for integration in self.backend.list_integrations().await? {
            let tools = match self.backend.get_tools(&integration.id).await {
                Ok(tools) => tools,
                Err(e) if e.is_interrupted() => return Err(e),
                Err(e) => {
                    tracing::debug!(integration = %integration.id, "Skipping integration: {}", e);
                    continue;
                }
            };
            if !tools.iter().any(|t| t.name == args.function_name) {
                continue;
            }

            tracing::info!(
                function = %args.function_name,
                integration = %integration.id,
                linked_owner = %owner,
                "Executing function"
            );

            let result = self
                .backend
                .execute_tool(&integration.id, &args.function_name, args.function_arguments)
                .await?;

            return Ok(json!({
                "success": true,
                "function_name": args.function_name,
                "result": result,
                "integration": integration.name,
            }));
        }

        Err(McpError::FunctionNotFound {
            name: args.function_name,
        })
    }
}

/// Case-sensitive literal containment on name or description
fn matches_query(tool: &Tool, query: &str) -> bool {
    query.is_empty() || tool.name.contains(query) || tool.description.contains(query)
}

#[async_trait::async_trait]
impl McpServer for UnifiedServer {
    fn variant(&self) -> ServerVariant {
        ServerVariant::Unified
    }

    async fn initialize(&self, params: InitializeParams) -> McpResult<InitializeResult> {
        tracing::info!(
            linked_owner = %self.linked_account_owner_id,
            allowed_apps_only = self.allowed_apps_only,
            client = ?params.client_info.as_ref().map(|c| c.name.as_str()),
            "Initializing unified MCP server"
        );

        self.lifecycle.mark_initialized().await?;

        Ok(InitializeResult::new(
            ServerInfo::new(SERVER_NAME).with("allowedAppsOnly", self.allowed_apps_only),
        ))
    }

    async fn list_tools(&self) -> McpResult<Vec<ToolDescriptor>> {
        self.lifecycle.ensure_initialized().await?;
        Ok(Self::meta_tools())
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> McpResult<Value> {
        self.lifecycle.ensure_initialized().await?;

        tracing::info!(tool = %name, "Executing unified MCP tool");

        match name {
            SEARCH_FUNCTIONS => self.search_functions(arguments).await,
            EXECUTE_FUNCTION => self.execute_function(arguments).await,
            other => Err(McpError::ToolNotFound {
                name: other.to_string(),
                available: vec![SEARCH_FUNCTIONS.to_string(), EXECUTE_FUNCTION.to_string()],
            }),
        }
    }

    async fn list_resources(&self) -> McpResult<Vec<ResourceDescriptor>> {
        self.lifecycle.ensure_initialized().await?;

        let resources: Vec<ResourceDescriptor> = self
            .backend
            .list_integrations()
            .await?
            .into_iter()
            .map(|integration| ResourceDescriptor {
                uri: format!("integration://{}", integration.id),
                name: integration.name,
                description: integration.description,
                mime_type: "application/json".to_string(),
            })
            .collect();

        tracing::debug!("Returning {} unified MCP resources", resources.len());
        Ok(resources)
    }

    // TODO: resolve integration:// URIs to the integration's definition once
    // the directory exposes a single-integration lookup.
    async fn read_resource(&self, uri: &str) -> McpResult<Value> {
        self.lifecycle.ensure_initialized().await?;

        tracing::debug!("Reading unified MCP resource {}", uri);

        Ok(json!({
            "uri": uri,
            "content": "Resource content would be provided here",
            "mimeType": "application/json",
            "timestamp": chrono::Utc::now().timestamp().to_string(),
        }))
    }

    async fn shutdown(&self) -> McpResult<()> {
        tracing::info!("Shutting down unified MCP server");
        self.lifecycle.mark_shutdown().await;
        Ok(())
    }
}
