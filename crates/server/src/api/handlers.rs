use super::ApiResult;
use crate::config::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use conduit_mcp::{InstanceInfo, InstanceStatus, ManagerMetrics, ServerConfig, StartServerRequest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Start a new MCP server instance
pub async fn start_server(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartServerRequest>,
) -> ApiResult<(StatusCode, Json<InstanceInfo>)> {
    let config = ServerConfig::try_from(req)?;
    let info = state.manager.start_server(config).await?;

    Ok((StatusCode::CREATED, Json(info)))
}

/// List all managed instances
pub async fn list_servers(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ListServersResponse>> {
    let servers = state.manager.list_servers().await;
    Ok(Json(ListServersResponse {
        total: servers.len(),
        servers,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListServersResponse {
    pub servers: Vec<InstanceInfo>,
    pub total: usize,
}

/// Get a specific instance
pub async fn get_server(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<InstanceInfo>> {
    Ok(Json(state.manager.get_server(&id).await?))
}

/// Stop a running instance
pub async fn stop_server(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<StopServerResponse>> {
    state.manager.stop_server(&id).await?;

    Ok(Json(StopServerResponse {
        id,
        status: InstanceStatus::Stopping,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopServerResponse {
    pub id: String,
    pub status: InstanceStatus,
}

/// Stop every running instance
pub async fn stop_all_servers(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<StopAllResponse>> {
    let stopped = state.manager.stop_all_servers().await;
    Ok(Json(StopAllResponse { stopped }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopAllResponse {
    pub stopped: usize,
}

/// Status of every instance, keyed by id
pub async fn server_status(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<BTreeMap<String, InstanceStatus>>> {
    Ok(Json(state.manager.server_status().await))
}

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> ApiResult<Json<ManagerMetrics>> {
    Ok(Json(state.manager.get_metrics().await))
}

/// Remove stopped and failed instances
pub async fn cleanup_servers(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<CleanupResponse>> {
    let removed = state.manager.cleanup_stopped_servers().await;
    Ok(Json(CleanupResponse { removed }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub removed: usize,
}
