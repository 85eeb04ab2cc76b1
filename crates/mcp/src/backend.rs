// Deadline- and cancellation-aware access to the integration collaborators

use crate::error::{McpError, McpResult};
use conduit_core::{Integration, IntegrationDirectory, IntegrationId, Tool, ToolCatalog};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Deadlines applied to outbound collaborator calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    /// Listing integrations and fetching tool lists
    pub list: Duration,
    /// Executing a tool
    pub execute: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            list: Duration::from_secs(10),
            execute: Duration::from_secs(30),
        }
    }
}

/// Handle to the integration directory and tool catalog used by server variants.
///
/// Every call is bounded by [`CallTimeouts`] and aborted when the owning
/// instance is cancelled.
#[derive(Clone)]
pub struct Backend {
    directory: Arc<dyn IntegrationDirectory>,
    catalog: Arc<dyn ToolCatalog>,
    timeouts: CallTimeouts,
    cancel: CancellationToken,
}

impl Backend {
    pub fn new(directory: Arc<dyn IntegrationDirectory>, catalog: Arc<dyn ToolCatalog>) -> Self {
        Self {
            directory,
            catalog,
            timeouts: CallTimeouts::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: CallTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// A copy of this backend whose calls abort when `cancel` fires
    pub fn scoped(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    pub fn timeouts(&self) -> CallTimeouts {
        self.timeouts
    }

    pub async fn list_integrations(&self) -> McpResult<Vec<Integration>> {
        self.guarded(
            "list integrations",
            self.timeouts.list,
            self.directory.list_integrations(),
        )
        .await
    }

    pub async fn get_tools(&self, integration_id: &IntegrationId) -> McpResult<Vec<Tool>> {
        self.guarded(
            "get tools",
            self.timeouts.list,
            self.catalog.get_tools(integration_id),
        )
        .await
    }

    pub async fn execute_tool(
        &self,
        integration_id: &IntegrationId,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> McpResult<Value> {
        self.guarded(
            "execute tool",
            self.timeouts.execute,
            self.catalog.execute_tool(integration_id, tool_name, arguments),
        )
        .await
    }

    async fn guarded<T>(
        &self,
        operation: &'static str,
        deadline: Duration,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> McpResult<T> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(McpError::Cancelled),
            outcome = tokio::time::timeout(deadline, call) => match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(McpError::collaborator(format!("failed to {}", operation), e)),
                Err(_) => {
                    tracing::warn!("Collaborator call '{}' exceeded {:?}", operation, deadline);
                    Err(McpError::Timeout {
                        operation,
                        after: deadline,
                    })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_backend, SlowCatalog};

    #[tokio::test]
    async fn test_calls_pass_through() {
        let backend = sample_backend();

        let integrations = backend.list_integrations().await.unwrap();
        assert_eq!(integrations.len(), 3);

        let tools = backend.get_tools(&integrations[0].id).await.unwrap();
        assert!(!tools.is_empty());
    }

    #[tokio::test]
    async fn test_collaborator_failure_is_wrapped() {
        let backend = sample_backend();

        let err = backend
            .get_tools(&IntegrationId::new("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Collaborator { .. }));
        assert!(err.to_string().contains("failed to get tools"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_enforced() {
        let slow = Arc::new(SlowCatalog::new(Duration::from_secs(60)));
        let backend = Backend::new(slow.clone(), slow).with_timeouts(CallTimeouts {
            list: Duration::from_secs(1),
            execute: Duration::from_secs(2),
        });

        let err = backend.list_integrations().await.unwrap_err();
        assert!(matches!(
            err,
            McpError::Timeout {
                operation: "list integrations",
                ..
            }
        ));

        let err = backend
            .execute_tool(&IntegrationId::new("slow"), "wait", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Timeout { after, .. } if after == Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_call() {
        let slow = Arc::new(SlowCatalog::new(Duration::from_secs(60)));
        let cancel = CancellationToken::new();
        let backend = Backend::new(slow.clone(), slow).scoped(cancel.clone());

        let call = tokio::spawn(async move { backend.list_integrations().await });
        cancel.cancel();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, McpError::Cancelled));
    }
}
