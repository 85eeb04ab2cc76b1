//! Error types for MCP servers, transports and the instance manager.

use crate::manager::InstanceStatus;
use std::time::Duration;

/// Result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;

/// Errors raised by protocol operations and lifecycle management.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// A capability operation was invoked before `initialize`.
    #[error("server not initialized")]
    NotInitialized,

    /// The server has been shut down and cannot be re-initialized.
    #[error("server has been shut down")]
    ServerShutDown,

    /// The requested tool is not exposed by this server.
    #[error("tool '{name}' not found. Available tools: {available:?}")]
    ToolNotFound { name: String, available: Vec<String> },

    /// No integration exposes the requested function.
    #[error("function '{name}' not found. Use ACI_SEARCH_FUNCTIONS to discover available functions")]
    FunctionNotFound { name: String },

    /// A cached tool no longer has an owning integration.
    #[error("tool '{name}' execution failed - integration not found")]
    ToolOwnerNotFound { name: String },

    /// The app is outside the configured allow-list.
    #[error("app '{app}' not allowed. Allowed apps: {allowed:?}")]
    AppNotAllowed { app: String, allowed: Vec<String> },

    /// The resource URI does not follow the server's scheme.
    #[error("invalid URI format '{uri}'. Expected {expected}")]
    InvalidUri { uri: String, expected: &'static str },

    /// Tool arguments are missing or ill-typed.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// No managed instance has this id.
    #[error("server {id} not found")]
    ServerNotFound { id: String },

    /// The instance is not in the `running` state.
    #[error("server {id} is not running (status: {status})")]
    NotRunning { id: String, status: InstanceStatus },

    /// Another SSE instance holds the port.
    #[error("port {port} already in use by server {server_id}")]
    PortConflict { port: u16, server_id: String },

    /// Another stdio instance owns the process streams.
    #[error("stdio transport already in use by server {server_id}")]
    StdioBusy { server_id: String },

    #[error("unsupported transport type: {0}. Supported: stdio, sse")]
    UnsupportedTransport(String),

    #[error("unsupported server type: {0}. Supported: unified, apps")]
    UnsupportedVariant(String),

    #[error("invalid server configuration: {0}")]
    InvalidConfig(String),

    /// An outbound collaborator call exceeded its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The owning instance was cancelled while a call was in flight.
    #[error("operation cancelled")]
    Cancelled,

    /// The integration directory or tool catalog failed.
    #[error("{context}: {source:#}")]
    Collaborator {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    pub fn collaborator(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Collaborator {
            context: context.into(),
            source,
        }
    }

    /// Whether the error names something that does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound { .. }
                | Self::FunctionNotFound { .. }
                | Self::ToolOwnerNotFound { .. }
                | Self::ServerNotFound { .. }
        )
    }

    /// Whether a call was cut short by its deadline or by cancellation
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled)
    }
}
