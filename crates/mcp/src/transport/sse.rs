// HTTP transport: an event stream for server messages, a POST endpoint for requests

use super::{dispatch, Transport, TransportKind};
use crate::error::{McpError, McpResult};
use crate::protocol::{Message, MCP_PROTOCOL_VERSION};
use crate::server::McpServer;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

pub struct SseTransport {
    host: String,
    port: u16,
}

impl SseTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone)]
struct SseState {
    server: Arc<dyn McpServer>,
    cancel: CancellationToken,
}

/// Routes served for one instance
pub fn router(server: Arc<dyn McpServer>, cancel: CancellationToken) -> Router {
    Router::new()
        .route("/sse", get(event_stream))
        .route("/message", post(handle_message))
        .route("/health", get(health_check))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(SseState { server, cancel })
}

/// Stream the initialize announcement, then hold the channel open
async fn event_stream(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!("SSE client connected");

    let announcement = Event::default().json_data(Message::initialize_announcement());
    let cancel = state.cancel.clone();

    let stream = async_stream::stream! {
        match announcement {
            Ok(event) => yield Ok::<Event, Infallible>(event),
            Err(e) => tracing::error!("Failed to encode initialize event: {}", e),
        }
        cancel.cancelled().await;
        tracing::debug!("SSE stream closed by shutdown");
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn handle_message(State(state): State<SseState>, body: Bytes) -> Response {
    let message: Message = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Rejecting message body: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "Invalid JSON format" })),
            )
                .into_response();
        }
    };

    match dispatch(state.server.as_ref(), message).await {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "transport": "sse",
        "mcp_version": MCP_PROTOCOL_VERSION,
    }))
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn start(
        self: Box<Self>,
        server: Arc<dyn McpServer>,
        cancel: CancellationToken,
    ) -> McpResult<JoinHandle<McpResult<()>>> {
        let addr = self.address();
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!("Failed to bind SSE transport on {}: {}", addr, e);
            e
        })?;
        tracing::info!(variant = %server.variant(), "SSE transport listening on {}", addr);

        let app = router(server, cancel.clone());

        Ok(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await?;
            tracing::info!("SSE transport on {} stopped", addr);
            Ok::<(), McpError>(())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servers::UnifiedServer;
    use crate::test_support::sample_backend;
    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_router(cancel: CancellationToken) -> Router {
        let server: Arc<dyn McpServer> = Arc::new(UnifiedServer::new(
            sample_backend(),
            "owner-1".to_string(),
            false,
        ));
        router(server, cancel)
    }

    fn post_message(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/message")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = test_router(CancellationToken::new())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["transport"], "sse");
        assert_eq!(body["mcp_version"], "2024-11-05");
    }

    #[tokio::test]
    async fn test_invalid_json_is_rejected() {
        let response = test_router(CancellationToken::new())
            .oneshot(post_message("{oops"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({ "error": "Invalid JSON format" })
        );
    }

    #[tokio::test]
    async fn test_request_reply_and_notification() {
        let app = test_router(CancellationToken::new());

        let response = app
            .clone()
            .oneshot(post_message(
                r#"{"jsonrpc":"2.0","id":"init","method":"initialize","params":{}}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["id"], "init");
        assert_eq!(body["result"]["protocolVersion"], "2024-11-05");

        let response = app
            .clone()
            .oneshot(post_message(
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app
            .oneshot(post_message(
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"ACI_SEARCH_FUNCTIONS","arguments":{"query":"issue"}}}"#,
            ))
            .await
            .unwrap();
        let body = json_body(response).await;
        let text = body["result"]["content"][0]["text"].as_str().unwrap();
        let found: Value = serde_json::from_str(text).unwrap();
        assert_eq!(found["total"], 1);
    }

    #[tokio::test]
    async fn test_event_stream_announces_initialize() {
        let cancel = CancellationToken::new();
        let app = test_router(cancel.clone());

        // Already cancelled, so the stream ends after the first event
        cancel.cancel();
        let response = app
            .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let data = text
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap();
        let event: Value = serde_json::from_str(data).unwrap();
        assert_eq!(event["method"], "initialize");
        assert_eq!(event["params"]["capabilities"]["tools"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_start_fails_when_port_taken() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let server: Arc<dyn McpServer> = Arc::new(UnifiedServer::new(
            sample_backend(),
            String::new(),
            false,
        ));
        let transport = Box::new(SseTransport::new("127.0.0.1", port));
        assert_eq!(transport.kind(), TransportKind::Sse);

        let result = transport.start(server, CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_and_graceful_stop() {
        let server: Arc<dyn McpServer> = Arc::new(UnifiedServer::new(
            sample_backend(),
            String::new(),
            false,
        ));
        let cancel = CancellationToken::new();
        let handle = Box::new(SseTransport::new("127.0.0.1", 0))
            .start(server, cancel.clone())
            .await
            .unwrap();

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
