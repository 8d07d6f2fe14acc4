//! API routes for the control surface

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use cachetree_core::control::parse_kind;
use cachetree_core::{CacheStats, CacheSystem, Entry, Key, NodeListing, NodeSnapshot, Value};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::ApiError;

/// Application state
pub struct AppState {
    pub system: Arc<CacheSystem>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub nodes: usize,
}

/// Write request body
#[derive(Deserialize)]
pub struct WriteBody {
    pub value: Value,
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        nodes: state.system.topology().len(),
    })
}

/// List the nodes of a group (`clients`, `l2caches`, `l1caches`)
pub async fn list_nodes(
    State(state): State<Arc<AppState>>,
    Path(group): Path<String>,
) -> Result<Json<NodeListing>, ApiError> {
    let kind = parse_kind(&group).ok_or(ApiError::UnknownGroup(group))?;
    let listing = state.system.fault_injector().list(kind).await?;
    Ok(Json(listing))
}

pub async fn crash_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.system.fault_injector().crash(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn recover_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.system.fault_injector().recover(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn dump_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<NodeSnapshot>, ApiError> {
    Ok(Json(state.system.dump(&id).await?))
}

pub async fn node_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CacheStats>, ApiError> {
    Ok(Json(state.system.stats(&id).await?))
}

/// Read a key through a client
pub async fn read_key(
    State(state): State<Arc<AppState>>,
    Path((client, key)): Path<(String, Key)>,
) -> Result<Json<Entry>, ApiError> {
    let entry = state.system.client(&client)?.read_entry(key).await?;
    Ok(Json(entry))
}

/// Write a key through a client
pub async fn write_key(
    State(state): State<Arc<AppState>>,
    Path((client, key)): Path<(String, Key)>,
    Json(body): Json<WriteBody>,
) -> Result<Json<Entry>, ApiError> {
    let entry = state.system.client(&client)?.write(key, body.value).await?;
    Ok(Json(entry))
}

pub async fn dump_store(
    State(state): State<Arc<AppState>>,
) -> Result<Json<NodeSnapshot>, ApiError> {
    Ok(Json(state.system.store().dump().await?))
}

pub async fn clear_store(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.system.store().clear().await?;
    Ok(StatusCode::NO_CONTENT)
}
