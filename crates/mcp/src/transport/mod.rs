// Transports carrying protocol messages between clients and a server

pub mod sse;
pub mod stdio;

pub use sse::SseTransport;
pub use stdio::StdioTransport;

use crate::error::{McpError, McpResult};
use crate::protocol::{CallToolResult, ErrorObject, McpMethod, McpRequest, Message};
use crate::server::McpServer;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How an instance talks to its clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Newline-delimited JSON over the process streams
    Stdio,
    /// HTTP with a server-sent event stream
    Sse,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => f.write_str("stdio"),
            TransportKind::Sse => f.write_str("sse"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = McpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(TransportKind::Stdio),
            "sse" => Ok(TransportKind::Sse),
            other => Err(McpError::UnsupportedTransport(other.to_string())),
        }
    }
}

/// A channel that serves one protocol server until cancelled.
///
/// `start` returns once the transport is accepting traffic; the returned
/// handle resolves when the serve loop ends.
#[async_trait::async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    async fn start(
        self: Box<Self>,
        server: Arc<dyn McpServer>,
        cancel: CancellationToken,
    ) -> McpResult<JoinHandle<McpResult<()>>>;
}

/// Route one inbound message through the method table.
///
/// Returns the reply to send, or `None` for notifications and client
/// responses.
pub async fn dispatch(server: &dyn McpServer, message: Message) -> Option<Message> {
    let Some(method) = message.method.as_deref() else {
        if message.is_response() {
            tracing::debug!(id = ?message.id, "Ignoring client response");
            return None;
        }
        return Some(Message::failure(
            message.id,
            ErrorObject::invalid_request("Missing method"),
        ));
    };

    if method.starts_with("notifications/") {
        tracing::debug!("Received notification {}", method);
        return None;
    }

    let Some(known) = McpMethod::from_name(method) else {
        tracing::warn!("Unknown method {}", method);
        return Some(Message::failure(
            message.id,
            ErrorObject::method_not_found(method),
        ));
    };

    let request = match McpRequest::decode(known, message.params) {
        Ok(request) => request,
        Err(e) => {
            return Some(Message::failure(
                message.id,
                ErrorObject::invalid_params(known.as_str(), e.to_string()),
            ))
        }
    };

    tracing::debug!(method = %known, id = ?message.id, "Handling request");

    let outcome = match request {
        McpRequest::Initialize(params) => server
            .initialize(params)
            .await
            .and_then(|result| serde_json::to_value(result).map_err(McpError::from)),
        McpRequest::ListTools => server
            .list_tools()
            .await
            .map(|tools| json!({ "tools": tools })),
        McpRequest::CallTool(params) => server
            .call_tool(&params.name, params.arguments)
            .await
            .and_then(|value| {
                serde_json::to_value(CallToolResult::from_value(&value)).map_err(McpError::from)
            }),
        McpRequest::ListResources => server
            .list_resources()
            .await
            .map(|resources| json!({ "resources": resources })),
        McpRequest::ReadResource(params) => server.read_resource(&params.uri).await,
    };

    Some(match outcome {
        Ok(result) => Message::success(message.id, result),
        Err(e) => {
            tracing::warn!(method = %known, "Request failed: {}", e);
            Message::failure(
                message.id,
                ErrorObject::internal_error(known.failure_message(), e.to_string()),
            )
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servers::{AppsServer, UnifiedServer};
    use crate::test_support::sample_backend;
    use serde_json::Value;

    fn unified() -> UnifiedServer {
        UnifiedServer::new(sample_backend(), "owner-1".to_string(), false)
    }

    async fn call(server: &dyn McpServer, raw: Value) -> Option<Value> {
        let message: Message = serde_json::from_value(raw).unwrap();
        dispatch(server, message)
            .await
            .map(|reply| serde_json::to_value(reply).unwrap())
    }

    #[test]
    fn test_transport_kind_parsing() {
        assert_eq!("sse".parse::<TransportKind>().unwrap(), TransportKind::Sse);
        assert_eq!("stdio".parse::<TransportKind>().unwrap(), TransportKind::Stdio);
        assert!(matches!(
            "websocket".parse::<TransportKind>(),
            Err(McpError::UnsupportedTransport(t)) if t == "websocket"
        ));
        assert_eq!(
            serde_json::to_value(TransportKind::Sse).unwrap(),
            json!("sse")
        );
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let server = unified();
        let reply = call(&server, json!({"jsonrpc":"2.0","id":3,"method":"tools/delete"}))
            .await
            .unwrap();

        assert_eq!(reply["id"], 3);
        assert_eq!(reply["error"]["code"], -32601);
        assert_eq!(reply["error"]["message"], "Method not found");
        assert_eq!(reply["error"]["data"], "tools/delete");
    }

    #[tokio::test]
    async fn test_invalid_params() {
        let server = unified();
        let reply = call(
            &server,
            json!({"jsonrpc":"2.0","id":"x","method":"tools/call","params":{"name":7}}),
        )
        .await
        .unwrap();

        assert_eq!(reply["id"], "x");
        assert_eq!(reply["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn test_failure_before_initialize() {
        let server = unified();
        let reply = call(&server, json!({"jsonrpc":"2.0","id":1,"method":"tools/list"}))
            .await
            .unwrap();

        assert_eq!(reply["error"]["code"], -32603);
        assert_eq!(reply["error"]["message"], "Failed to list tools");
        assert_eq!(reply["error"]["data"], "server not initialized");
    }

    #[tokio::test]
    async fn test_request_flow_keeps_ids() {
        let server = AppsServer::new(sample_backend(), String::new(), vec!["GMAIL".to_string()]);

        let reply = call(
            &server,
            json!({"jsonrpc":"2.0","id":null,"method":"initialize","params":{"protocolVersion":"2024-11-05"}}),
        )
        .await
        .unwrap();
        assert_eq!(reply["id"], Value::Null);
        assert_eq!(reply["result"]["serverInfo"]["name"], "conduit-apps-mcp");

        let reply = call(&server, json!({"jsonrpc":"2.0","id":2,"method":"tools/list"}))
            .await
            .unwrap();
        assert_eq!(reply["result"]["tools"].as_array().unwrap().len(), 2);

        let reply = call(
            &server,
            json!({"jsonrpc":"2.0","id":"c","method":"tools/call","params":{"name":"send_email","arguments":{"to":"a@b.c"}}}),
        )
        .await
        .unwrap();
        assert_eq!(reply["id"], "c");
        let text = reply["result"]["content"][0]["text"].as_str().unwrap();
        let body: Value = serde_json::from_str(text).unwrap();
        assert_eq!(body["result"]["status"], "queued");

        let reply = call(&server, json!({"jsonrpc":"2.0","id":4,"method":"resources/list"}))
            .await
            .unwrap();
        assert_eq!(reply["result"]["resources"][0]["uri"], "app://GMAIL");

        let reply = call(
            &server,
            json!({"jsonrpc":"2.0","id":5,"method":"resources/read","params":{"uri":"app://Slack"}}),
        )
        .await
        .unwrap();
        assert_eq!(reply["error"]["message"], "Failed to read resource");
    }

    #[tokio::test]
    async fn test_notifications_and_responses_get_no_reply() {
        let server = unified();

        assert!(call(
            &server,
            json!({"jsonrpc":"2.0","method":"notifications/initialized"})
        )
        .await
        .is_none());
        assert!(call(&server, json!({"jsonrpc":"2.0","id":9,"result":{}}))
            .await
            .is_none());

        let reply = call(&server, json!({"jsonrpc":"2.0","id":9})).await.unwrap();
        assert_eq!(reply["error"]["code"], -32600);
    }
}
