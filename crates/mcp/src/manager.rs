//! Lifecycle management for concurrently running MCP server instances.
//!
//! Each instance is owned by one background task. The manager keeps a
//! registry of [`InstanceInfo`] snapshots keyed by instance id; the owning
//! task and the stop/cleanup calls are the only writers.

use crate::backend::Backend;
use crate::error::{McpError, McpResult};
use crate::server::{build_server, ServerVariant};
use crate::transport::{SseTransport, StdioTransport, Transport, TransportKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Lowest port an SSE instance may listen on
pub const MIN_PORT: u16 = 1024;

/// Configuration for one server instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub variant: ServerVariant,
    pub transport: TransportKind,
    /// Required for `sse`, ignored for `stdio`
    pub port: Option<u16>,
    pub linked_account_owner_id: String,
    /// Apps exposed by the `apps` variant
    #[serde(default)]
    pub allowed_apps: Vec<String>,
    /// Reported by the `unified` variant; does not filter search results
    #[serde(default)]
    pub allowed_apps_only: bool,
}

impl ServerConfig {
    pub fn unified(transport: TransportKind, port: Option<u16>) -> Self {
        Self {
            variant: ServerVariant::Unified,
            transport,
            port,
            linked_account_owner_id: String::new(),
            allowed_apps: Vec::new(),
            allowed_apps_only: false,
        }
    }

    pub fn apps(transport: TransportKind, port: Option<u16>, allowed_apps: Vec<String>) -> Self {
        Self {
            variant: ServerVariant::Apps,
            transport,
            port,
            linked_account_owner_id: String::new(),
            allowed_apps,
            allowed_apps_only: false,
        }
    }

    pub fn with_linked_account_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.linked_account_owner_id = owner_id.into();
        self
    }

    pub fn validate(&self) -> McpResult<()> {
        if self.transport == TransportKind::Sse {
            match self.port {
                None => {
                    return Err(McpError::InvalidConfig(
                        "port is required for sse transport".to_string(),
                    ))
                }
                Some(port) if port < MIN_PORT => {
                    return Err(McpError::InvalidConfig(format!(
                        "port {} out of range ({}-65535)",
                        port, MIN_PORT
                    )))
                }
                Some(_) => {}
            }
        }

        if self.variant == ServerVariant::Apps && self.allowed_apps.is_empty() {
            return Err(McpError::InvalidConfig(
                "allowed_apps must not be empty for apps server".to_string(),
            ));
        }

        Ok(())
    }

    /// The port this instance listens on, if any
    fn sse_port(&self) -> Option<u16> {
        match self.transport {
            TransportKind::Sse => self.port,
            TransportKind::Stdio => None,
        }
    }
}

/// Start request as received from clients
#[derive(Debug, Clone, Deserialize)]
pub struct StartServerRequest {
    #[serde(rename = "type")]
    pub server_type: String,
    pub transport_type: String,
    #[serde(default)]
    pub port: Option<i64>,
    #[serde(default)]
    pub linked_account_owner_id: String,
    #[serde(default)]
    pub allowed_apps: Vec<String>,
    #[serde(default)]
    pub allowed_apps_only: bool,
}

impl TryFrom<StartServerRequest> for ServerConfig {
    type Error = McpError;

    fn try_from(request: StartServerRequest) -> Result<Self, Self::Error> {
        let port = request
            .port
            .map(|port| {
                u16::try_from(port).map_err(|_| {
                    McpError::InvalidConfig(format!(
                        "port {} out of range ({}-65535)",
                        port, MIN_PORT
                    ))
                })
            })
            .transpose()?;

        Ok(Self {
            variant: request.server_type.parse()?,
            transport: request.transport_type.parse()?,
            port,
            linked_account_owner_id: request.linked_account_owner_id,
            allowed_apps: request.allowed_apps,
            allowed_apps_only: request.allowed_apps_only,
        })
    }
}

/// Status of a managed instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopping => "stopping",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Stopped | InstanceStatus::Failed)
    }

    pub fn can_transition_to(&self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Failed)
                | (Running, Stopping)
                | (Running, Stopped)
                | (Running, Failed)
                | (Stopping, Stopped)
        )
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a managed instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub variant: ServerVariant,
    #[serde(rename = "transport_type")]
    pub transport: TransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub status: InstanceStatus,
    #[serde(default)]
    pub allowed_apps: Vec<String>,
    pub started_at: DateTime<Utc>,
}

/// Aggregate counts over the registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagerMetrics {
    pub total_servers: usize,
    pub status_counts: BTreeMap<String, usize>,
    pub type_counts: BTreeMap<String, usize>,
    pub transport_counts: BTreeMap<String, usize>,
}

/// Builds the transport for a new instance
pub trait TransportFactory: Send + Sync {
    fn create(&self, config: &ServerConfig) -> McpResult<Box<dyn Transport>>;
}

/// Process stdio for `stdio`, an HTTP listener on `sse_host` for `sse`
#[derive(Debug, Clone)]
pub struct DefaultTransports {
    sse_host: String,
}

impl DefaultTransports {
    pub fn new(sse_host: impl Into<String>) -> Self {
        Self {
            sse_host: sse_host.into(),
        }
    }
}

impl Default for DefaultTransports {
    fn default() -> Self {
        Self::new("0.0.0.0")
    }
}

impl TransportFactory for DefaultTransports {
    fn create(&self, config: &ServerConfig) -> McpResult<Box<dyn Transport>> {
        match config.transport {
            TransportKind::Stdio => Ok(Box::new(StdioTransport::stdio())),
            TransportKind::Sse => {
                let port = config.port.ok_or_else(|| {
                    McpError::InvalidConfig("port is required for sse transport".to_string())
                })?;
                Ok(Box::new(SseTransport::new(self.sse_host.clone(), port)))
            }
        }
    }
}

struct Instance {
    info: InstanceInfo,
    cancel: CancellationToken,
}

type Registry = Arc<RwLock<HashMap<String, Instance>>>;

/// Starts, tracks and stops server instances
pub struct McpManager {
    backend: Backend,
    transports: Arc<dyn TransportFactory>,
    instances: Registry,
}

impl McpManager {
    pub fn new(backend: Backend) -> Self {
        Self::with_transport_factory(backend, Arc::new(DefaultTransports::default()))
    }

    pub fn with_transport_factory(backend: Backend, transports: Arc<dyn TransportFactory>) -> Self {
        Self {
            backend,
            transports,
            instances: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a new instance and start it in the background.
    ///
    /// Returns as soon as the instance is registered as `starting`; the
    /// owning task moves it to `running` or `failed`.
    pub async fn start_server(&self, config: ServerConfig) -> McpResult<InstanceInfo> {
        config.validate()?;
        let config = ServerConfig {
            port: config.sse_port(),
            ..config
        };

        let transport = self.transports.create(&config)?;
        let cancel = CancellationToken::new();

        let info = {
            let mut instances = self.instances.write().await;
            check_conflicts(&instances, &config)?;

            let id = loop {
                let id = instance_id(&config);
                if !instances.contains_key(&id) {
                    break id;
                }
            };

            let info = InstanceInfo {
                id: id.clone(),
                variant: config.variant,
                transport: config.transport,
                port: config.port,
                status: InstanceStatus::Starting,
                allowed_apps: config.allowed_apps.clone(),
                started_at: Utc::now(),
            };
            instances.insert(
                id,
                Instance {
                    info: info.clone(),
                    cancel: cancel.clone(),
                },
            );
            info
        };

        tracing::info!(
            server_id = %info.id,
            variant = %info.variant,
            transport = %info.transport,
            port = ?info.port,
            "Starting MCP server"
        );

        let backend = self.backend.scoped(cancel.clone());
        tokio::spawn(run_instance(
            self.instances.clone(),
            info.id.clone(),
            config,
            backend,
            transport,
            cancel,
        ));

        Ok(info)
    }

    /// Cancel a running instance and mark it `stopping`
    pub async fn stop_server(&self, id: &str) -> McpResult<()> {
        let mut instances = self.instances.write().await;
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| McpError::ServerNotFound { id: id.to_string() })?;

        if instance.info.status != InstanceStatus::Running {
            return Err(McpError::NotRunning {
                id: id.to_string(),
                status: instance.info.status,
            });
        }

        instance.cancel.cancel();
        instance.info.status = InstanceStatus::Stopping;
        tracing::info!(server_id = %id, "Stopping MCP server");
        Ok(())
    }

    pub async fn get_server(&self, id: &str) -> McpResult<InstanceInfo> {
        self.instances
            .read()
            .await
            .get(id)
            .map(|instance| instance.info.clone())
            .ok_or_else(|| McpError::ServerNotFound { id: id.to_string() })
    }

    /// All instances, oldest first
    pub async fn list_servers(&self) -> Vec<InstanceInfo> {
        let mut servers: Vec<InstanceInfo> = self
            .instances
            .read()
            .await
            .values()
            .map(|instance| instance.info.clone())
            .collect();
        servers.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        servers
    }

    pub async fn server_status(&self) -> BTreeMap<String, InstanceStatus> {
        self.instances
            .read()
            .await
            .iter()
            .map(|(id, instance)| (id.clone(), instance.info.status))
            .collect()
    }

    /// Cancel every running instance, returning how many were stopped
    pub async fn stop_all_servers(&self) -> usize {
        let mut instances = self.instances.write().await;
        let mut stopped = 0;

        for (id, instance) in instances.iter_mut() {
            if instance.info.status == InstanceStatus::Running {
                instance.cancel.cancel();
                instance.info.status = InstanceStatus::Stopping;
                tracing::info!(server_id = %id, "Stopping MCP server");
                stopped += 1;
            }
        }

        if stopped > 0 {
            tracing::info!("Stopped {} MCP servers", stopped);
        }
        stopped
    }

    /// Drop `stopped` and `failed` instances, returning how many were removed
    pub async fn cleanup_stopped_servers(&self) -> usize {
        let mut instances = self.instances.write().await;
        let before = instances.len();
        instances.retain(|_, instance| !instance.info.status.is_terminal());
        let removed = before - instances.len();

        tracing::info!("Cleaned up {} stopped MCP servers", removed);
        removed
    }

    pub async fn get_metrics(&self) -> ManagerMetrics {
        let instances = self.instances.read().await;
        let mut metrics = ManagerMetrics {
            total_servers: instances.len(),
            ..Default::default()
        };

        for instance in instances.values() {
            let info = &instance.info;
            *metrics
                .status_counts
                .entry(info.status.to_string())
                .or_default() += 1;
            *metrics
                .type_counts
                .entry(info.variant.to_string())
                .or_default() += 1;
            *metrics
                .transport_counts
                .entry(info.transport.to_string())
                .or_default() += 1;
        }

        metrics
    }
}

fn instance_id(config: &ServerConfig) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", config.variant, config.transport, &suffix[..8])
}

/// Reject a start that would share a port or process stdio with a live instance
fn check_conflicts(instances: &HashMap<String, Instance>, config: &ServerConfig) -> McpResult<()> {
    let live = instances
        .values()
        .map(|instance| &instance.info)
        .filter(|info| !info.status.is_terminal());

    for info in live {
        match config.transport {
            TransportKind::Sse => {
                if info.transport == TransportKind::Sse && info.port == config.port {
                    if let Some(port) = config.port {
                        return Err(McpError::PortConflict {
                            port,
                            server_id: info.id.clone(),
                        });
                    }
                }
            }
            TransportKind::Stdio => {
                if info.transport == TransportKind::Stdio {
                    return Err(McpError::StdioBusy {
                        server_id: info.id.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}

/// Apply a status change if the transition is allowed
async fn transition(instances: &Registry, id: &str, next: InstanceStatus) -> bool {
    let mut instances = instances.write().await;
    let Some(instance) = instances.get_mut(id) else {
        return false;
    };

    let current = instance.info.status;
    if current.can_transition_to(next) {
        instance.info.status = next;
        true
    } else {
        tracing::debug!(server_id = %id, "Ignoring status change {} -> {}", current, next);
        false
    }
}

async fn run_instance(
    instances: Registry,
    id: String,
    config: ServerConfig,
    backend: Backend,
    transport: Box<dyn Transport>,
    cancel: CancellationToken,
) {
    let server = build_server(&config, backend);

    let handle = match transport.start(server.clone(), cancel).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(server_id = %id, "MCP server failed to start: {}", e);
            transition(&instances, &id, InstanceStatus::Failed).await;
            return;
        }
    };

    transition(&instances, &id, InstanceStatus::Running).await;
    tracing::info!(server_id = %id, "MCP server running");

    let failed = match handle.await {
        Ok(Ok(())) => false,
        Ok(Err(e)) => {
            tracing::error!(server_id = %id, "MCP server transport error: {}", e);
            true
        }
        Err(e) => {
            tracing::error!(server_id = %id, "MCP server transport task aborted: {}", e);
            true
        }
    };

    if let Err(e) = server.shutdown().await {
        tracing::warn!(server_id = %id, "MCP server shutdown failed: {}", e);
    }

    let settled = failed && transition(&instances, &id, InstanceStatus::Failed).await;
    if !settled {
        transition(&instances, &id, InstanceStatus::Stopped).await;
    }
    tracing::info!(server_id = %id, "MCP server stopped");
}
