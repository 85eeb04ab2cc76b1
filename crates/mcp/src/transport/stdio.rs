//! Newline-delimited JSON transport.
//!
//! One message per line in each direction. Messages are handled in the
//! order they are read, except `tools/call`, which runs in its own task so a
//! slow tool does not hold up the stream. Replies are written under a lock so
//! lines never interleave.

use super::{dispatch, Transport, TransportKind};
use crate::error::McpResult;
use crate::protocol::{McpMethod, Message};
use crate::server::McpServer;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

pub struct StdioTransport<R, W> {
    reader: R,
    writer: W,
}

impl StdioTransport<BufReader<tokio::io::Stdin>, tokio::io::Stdout> {
    /// Transport over the process stdin and stdout
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

async fn write_message<W>(writer: &Mutex<W>, message: &Message) -> McpResult<()>
where
    W: AsyncWrite + Unpin,
{
    let line = serde_json::to_string(message)?;

    let mut writer = writer.lock().await;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

async fn handle_message<W>(server: &dyn McpServer, writer: &Mutex<W>, message: Message)
where
    W: AsyncWrite + Unpin,
{
    if let Some(reply) = dispatch(server, message).await {
        if let Err(e) = write_message(writer, &reply).await {
            tracing::error!("Failed to write reply: {}", e);
        }
    }
}

async fn serve<R, W>(
    reader: R,
    writer: Arc<Mutex<W>>,
    server: Arc<dyn McpServer>,
    cancel: CancellationToken,
) -> McpResult<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = reader.lines();
    let mut in_flight = JoinSet::new();

    let outcome = loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stdio transport cancelled");
                break Ok(());
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("Stdio input closed");
                break Ok(());
            }
            Err(e) => {
                tracing::error!("Failed to read from stdio: {}", e);
                break Err(e.into());
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let message: Message = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping malformed message: {}", e);
                continue;
            }
        };

        if message.method.as_deref() == Some(McpMethod::CallTool.as_str()) {
            let server = server.clone();
            let writer = writer.clone();
            in_flight.spawn(async move {
                handle_message(server.as_ref(), &writer, message).await;
            });
        } else {
            // Lifecycle changes must land before the next line is read
            handle_message(server.as_ref(), &writer, message).await;
        }

        // Reap finished handlers so the set stays small on long sessions
        while in_flight.try_join_next().is_some() {}
    };

    while in_flight.join_next().await.is_some() {}
    outcome
}

#[async_trait::async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn start(
        self: Box<Self>,
        server: Arc<dyn McpServer>,
        cancel: CancellationToken,
    ) -> McpResult<JoinHandle<McpResult<()>>> {
        let StdioTransport { reader, writer } = *self;
        let writer = Arc::new(Mutex::new(writer));

        write_message(&writer, &Message::initialize_announcement()).await?;
        tracing::info!(variant = %server.variant(), "Stdio transport started");

        Ok(tokio::spawn(serve(reader, writer, server, cancel)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::servers::{AppsServer, UnifiedServer};
    use crate::test_support::{sample_backend, SlowCatalog};
    use std::time::Duration;
    use serde_json::{json, Value};
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    struct Client {
        input: DuplexStream,
        output: tokio::io::Lines<BufReader<DuplexStream>>,
    }

    impl Client {
        async fn send(&mut self, raw: &str) {
            self.input.write_all(raw.as_bytes()).await.unwrap();
            self.input.write_all(b"\n").await.unwrap();
        }

        async fn recv(&mut self) -> Value {
            let line = self.output.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }
    }

    async fn start(
        cancel: CancellationToken,
    ) -> (Client, JoinHandle<McpResult<()>>) {
        let server: Arc<dyn McpServer> = Arc::new(UnifiedServer::new(
            sample_backend(),
            "owner-1".to_string(),
            false,
        ));
        start_with(server, cancel).await
    }

    async fn start_with(
        server: Arc<dyn McpServer>,
        cancel: CancellationToken,
    ) -> (Client, JoinHandle<McpResult<()>>) {
        let (client_in, server_in) = duplex(4096);
        let (server_out, client_out) = duplex(4096);

        let transport = Box::new(StdioTransport::new(BufReader::new(server_in), server_out));
        let handle = transport.start(server, cancel).await.unwrap();

        let client = Client {
            input: client_in,
            output: BufReader::new(client_out).lines(),
        };
        (client, handle)
    }

    #[tokio::test]
    async fn test_announces_then_serves_requests() {
        let (mut client, handle) = start(CancellationToken::new()).await;

        let hello = client.recv().await;
        assert_eq!(hello["method"], "initialize");
        assert!(hello.get("id").is_none());
        assert_eq!(hello["params"]["protocolVersion"], "2024-11-05");

        client
            .send(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
            .await;
        let reply = client.recv().await;
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["serverInfo"]["name"], "conduit-unified-mcp");

        client
            .send(r#"{"jsonrpc":"2.0","id":"t","method":"tools/list"}"#)
            .await;
        let reply = client.recv().await;
        assert_eq!(reply["id"], "t");
        assert_eq!(reply["result"]["tools"].as_array().unwrap().len(), 2);

        drop(client);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_lines_are_dropped() {
        let (mut client, handle) = start(CancellationToken::new()).await;
        client.recv().await;

        client.send("{not json").await;
        client.send("").await;
        client
            .send(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        client
            .send(r#"{"jsonrpc":"2.0","id":7,"method":"tools/delete"}"#)
            .await;

        // The only reply is for the unknown method
        let reply = client.recv().await;
        assert_eq!(reply["id"], 7);
        assert_eq!(reply["error"]["code"], -32601);

        drop(client);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_ends_loop_with_input_open() {
        let cancel = CancellationToken::new();
        let (mut client, handle) = start(cancel.clone()).await;
        client.recv().await;

        cancel.cancel();
        handle.await.unwrap().unwrap();

        // Output side is closed once the loop has dropped the writer
        let mut rest = String::new();
        client
            .output
            .get_mut()
            .read_to_string(&mut rest)
            .await
            .unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_requests_each_get_a_line() {
        let (mut client, handle) = start(CancellationToken::new()).await;
        client.recv().await;

        client
            .send(r#"{"jsonrpc":"2.0","id":0,"method":"initialize"}"#)
            .await;
        assert_eq!(client.recv().await["id"], 0);

        for id in 1..=5 {
            let request = json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "tools/call",
                "params": { "name": "ACI_SEARCH_FUNCTIONS", "arguments": { "query": "message" } },
            });
            client.send(&request.to_string()).await;
        }

        let mut ids = Vec::new();
        for _ in 0..5 {
            let reply = client.recv().await;
            assert_eq!(reply["result"]["content"][0]["type"], "text");
            ids.push(reply["id"].as_i64().unwrap());
        }
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        drop(client);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_back_to_back_lines_are_handled_in_order() {
        let slow = Arc::new(SlowCatalog::new(Duration::from_millis(50)));
        let server: Arc<dyn McpServer> = Arc::new(AppsServer::new(
            Backend::new(slow.clone(), slow),
            "owner-1".to_string(),
            vec!["GMAIL".to_string()],
        ));
        let (mut client, handle) = start_with(server, CancellationToken::new()).await;
        client.recv().await;

        // Second line is written before the first has been answered
        client
            .send(r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#)
            .await;
        client
            .send(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
            .await;

        let first = client.recv().await;
        assert_eq!(first["id"], 1);
        assert_eq!(first["result"]["serverInfo"]["name"], "conduit-apps-mcp");

        let second = client.recv().await;
        assert_eq!(second["id"], 2);
        assert!(second.get("error").is_none());
        assert_eq!(second["result"]["tools"], json!([]));

        drop(client);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_message_without_version_tag_is_answered() {
        let (mut client, handle) = start(CancellationToken::new()).await;
        client.recv().await;

        client
            .send(r#"{"id":1,"method":"initialize","params":{}}"#)
            .await;
        let reply = client.recv().await;
        assert_eq!(reply["jsonrpc"], "2.0");
        assert_eq!(reply["id"], 1);
        assert!(reply["result"]["serverInfo"].is_object());

        drop(client);
        handle.await.unwrap().unwrap();
    }
}
