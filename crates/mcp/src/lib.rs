// MCP (Model Context Protocol) servers, transports and instance management
// Exposes integration tools to agent clients over stdio or SSE

pub mod backend;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod server;
pub mod servers;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use backend::{Backend, CallTimeouts};
pub use error::{McpError, McpResult};
pub use manager::{
    DefaultTransports, InstanceInfo, InstanceStatus, ManagerMetrics, McpManager, ServerConfig,
    StartServerRequest, TransportFactory,
};
pub use server::{build_server, McpServer, ServerVariant};
pub use transport::{SseTransport, StdioTransport, Transport, TransportKind};
