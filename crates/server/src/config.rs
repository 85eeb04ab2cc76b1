use anyhow::{Context, Result};
use conduit_core::StaticCatalog;
use conduit_mcp::{Backend, CallTimeouts, DefaultTransports, McpManager};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Integration catalog file; an empty catalog is used when missing
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Interface SSE instances bind to
    #[serde(default = "default_sse_host")]
    pub sse_host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_list_secs")]
    pub list_secs: u64,

    #[serde(default = "default_execute_secs")]
    pub execute_secs: u64,
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("catalog.toml")
}

fn default_sse_host() -> String {
    "0.0.0.0".to_string()
}

fn default_list_secs() -> u64 {
    10
}

fn default_execute_secs() -> u64 {
    30
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            sse_host: default_sse_host(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            list_secs: default_list_secs(),
            execute_secs: default_execute_secs(),
        }
    }
}

impl HubConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        // Load config file if it exists, otherwise use defaults
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")
        } else {
            tracing::info!("Configuration file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn call_timeouts(&self) -> CallTimeouts {
        CallTimeouts {
            list: Duration::from_secs(self.timeouts.list_secs),
            execute: Duration::from_secs(self.timeouts.execute_secs),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<McpManager>,
}

impl AppState {
    pub fn new(config: &HubConfig) -> Result<Self> {
        let catalog = if config.catalog.path.exists() {
            StaticCatalog::load(&config.catalog.path).context("Failed to load catalog")?
        } else {
            tracing::warn!(
                "Catalog {} not found, starting with no integrations",
                config.catalog.path.display()
            );
            StaticCatalog::new()
        };
        let catalog = Arc::new(catalog);

        let backend = Backend::new(catalog.clone(), catalog).with_timeouts(config.call_timeouts());
        let manager = McpManager::with_transport_factory(
            backend,
            Arc::new(DefaultTransports::new(config.transport.sse_host.clone())),
        );

        Ok(Self {
            manager: Arc::new(manager),
        })
    }

    #[cfg(test)]
    pub fn with_manager(manager: McpManager) -> Self {
        Self {
            manager: Arc::new(manager),
        }
    }
}
