// Standalone MCP server binary: one server instance over process stdio

use anyhow::{Context, Result};
use conduit_core::StaticCatalog;
use conduit_mcp::transport::Transport;
use conduit_mcp::{build_server, Backend, ServerConfig, ServerVariant, StdioTransport, TransportKind};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries protocol messages
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conduit=info".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Conduit MCP server starting...");

    let catalog_path = PathBuf::from(
        std::env::var("CONDUIT_CATALOG").unwrap_or_else(|_| "./catalog.toml".to_string()),
    );
    let catalog = Arc::new(
        StaticCatalog::load(&catalog_path)
            .with_context(|| format!("failed to load catalog {}", catalog_path.display()))?,
    );

    let variant: ServerVariant = std::env::var("CONDUIT_SERVER_TYPE")
        .unwrap_or_else(|_| "unified".to_string())
        .parse()?;

    let allowed_apps: Vec<String> = std::env::var("CONDUIT_ALLOWED_APPS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|app| !app.is_empty())
        .map(String::from)
        .collect();

    let config = match variant {
        ServerVariant::Unified => ServerConfig::unified(TransportKind::Stdio, None),
        ServerVariant::Apps => ServerConfig::apps(TransportKind::Stdio, None, allowed_apps),
    }
    .with_linked_account_owner(
        std::env::var("CONDUIT_LINKED_ACCOUNT_OWNER_ID").unwrap_or_default(),
    );
    config.validate()?;

    let cancel = CancellationToken::new();
    let backend = Backend::new(catalog.clone(), catalog).scoped(cancel.clone());
    let server = build_server(&config, backend);

    let handle = Box::new(StdioTransport::stdio())
        .start(server.clone(), cancel.clone())
        .await?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            cancel.cancel();
        }
    });

    let outcome = handle.await.context("stdio transport task aborted")?;
    server.shutdown().await?;
    outcome?;

    tracing::info!("Conduit MCP server stopped");
    Ok(())
}
