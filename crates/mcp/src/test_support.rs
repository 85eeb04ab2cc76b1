// Shared fixtures for unit tests

use crate::backend::Backend;
use conduit_core::{
    CatalogTool, Integration, IntegrationDirectory, IntegrationId, StaticCatalog, Tool,
    ToolCatalog,
};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn sample_catalog() -> StaticCatalog {
    StaticCatalog::new()
        .with_integration(
            Integration::new("int-gmail", "GMAIL").with_description("Google mail"),
            vec![
                CatalogTool {
                    tool: Tool::new("send_email", "Send an email message"),
                    response: Some(json!({ "status": "queued" })),
                },
                Tool::new("list_labels", "List mailbox labels").into(),
            ],
        )
        .with_integration(
            Integration::new("int-slack", "Slack").with_description("Team chat"),
            vec![Tool::new("post_message", "Post a message to a channel")],
        )
        .with_integration(
            Integration::new("int-github", "GitHub").with_description("Code hosting"),
            vec![Tool::new("create_issue", "Open an issue in a repository")],
        )
}

pub fn sample_backend() -> Backend {
    let catalog = Arc::new(sample_catalog());
    Backend::new(catalog.clone(), catalog)
}

/// Backend whose directory lists an integration the catalog cannot serve
pub fn backend_with_broken_integration() -> Backend {
    let directory = Arc::new(
        StaticCatalog::new()
            .with_integration(Integration::new("int-broken", "Broken"), Vec::<Tool>::new())
            .with_integration(
                Integration::new("int-gmail", "GMAIL"),
                vec![Tool::new("send_email", "Send an email message")],
            ),
    );
    let catalog = Arc::new(StaticCatalog::new().with_integration(
        Integration::new("int-gmail", "GMAIL"),
        vec![Tool::new("send_email", "Send an email message")],
    ));
    Backend::new(directory, catalog)
}

/// Backend with no integrations at all
pub fn empty_backend() -> Backend {
    let catalog = Arc::new(StaticCatalog::new());
    Backend::new(catalog.clone(), catalog)
}

/// Collaborator that answers every call after a fixed delay
pub struct SlowCatalog {
    delay: Duration,
}

impl SlowCatalog {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait::async_trait]
impl IntegrationDirectory for SlowCatalog {
    async fn list_integrations(&self) -> anyhow::Result<Vec<Integration>> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }
}

#[async_trait::async_trait]
impl ToolCatalog for SlowCatalog {
    async fn get_tools(&self, _integration_id: &IntegrationId) -> anyhow::Result<Vec<Tool>> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }

    async fn execute_tool(
        &self,
        _integration_id: &IntegrationId,
        _tool_name: &str,
        _arguments: Map<String, Value>,
    ) -> anyhow::Result<Value> {
        tokio::time::sleep(self.delay).await;
        Ok(Value::Null)
    }
}

/// Catalog serving the sample tools until `stall` is called, after which
/// tool listing hangs
pub struct StallingCatalog {
    inner: StaticCatalog,
    stalled: AtomicBool,
}

impl StallingCatalog {
    pub fn new() -> Self {
        Self {
            inner: sample_catalog(),
            stalled: AtomicBool::new(false),
        }
    }

    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ToolCatalog for StallingCatalog {
    async fn get_tools(&self, integration_id: &IntegrationId) -> anyhow::Result<Vec<Tool>> {
        if self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.inner.get_tools(integration_id).await
    }

    async fn execute_tool(
        &self,
        integration_id: &IntegrationId,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> anyhow::Result<Value> {
        self.inner.execute_tool(integration_id, tool_name, arguments).await
    }
}

/// Backend over the sample directory whose tool listing can be stalled
pub fn stalling_backend(catalog: Arc<StallingCatalog>) -> Backend {
    Backend::new(Arc::new(sample_catalog()), catalog).with_timeouts(crate::backend::CallTimeouts {
        list: Duration::from_secs(1),
        execute: Duration::from_secs(1),
    })
}
