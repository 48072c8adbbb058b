use super::{ApiError, ApiResult};
use crate::config::AppState;
use crate::middleware::auth::AuthUser;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use openpact_core::secrets::SecretMetadata;
use openpact_mcp::tools::scripts::{self, ScriptEntry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Effective configuration, with directories relative to the workspace
#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub workspace: String,
    pub data_dir: String,
    pub scripts_dir: String,
    pub ai_data_dir: String,
    pub features: Vec<String>,
    pub dev_mode: bool,
    pub access_expiry_secs: u64,
    pub refresh_expiry_secs: u64,
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ConfigResponse> {
    let config = &state.config;
    Json(ConfigResponse {
        workspace: config.display_path(&config.workspace_path),
        data_dir: config.display_path(&config.data_dir),
        scripts_dir: config.display_path(&config.scripts_dir),
        ai_data_dir: config.display_path(&config.ai_data_dir),
        features: config.features.iter().cloned().collect(),
        dev_mode: config.dev_mode,
        access_expiry_secs: config.access_expiry.as_secs(),
        refresh_expiry_secs: config.refresh_expiry.as_secs(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub required_flags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListToolsResponse {
    pub tools: Vec<ToolInfo>,
}

/// Enabled MCP tools
pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<ListToolsResponse> {
    let tools = state
        .tools
        .list()
        .into_iter()
        .map(|tool| ToolInfo {
            name: tool.schema.name.clone(),
            description: tool.schema.description.clone(),
            required_flags: tool.required_flags.iter().cloned().collect(),
        })
        .collect();
    Json(ListToolsResponse { tools })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListSecretsResponse {
    pub secrets: Vec<SecretMetadata>,
}

pub async fn list_secrets(State(state): State<Arc<AppState>>) -> ApiResult<Json<ListSecretsResponse>> {
    let secrets = state.secrets.list().await?;
    Ok(Json(ListSecretsResponse { secrets }))
}

#[derive(Debug, Deserialize)]
pub struct PutSecretRequest {
    pub value: String,
}

pub async fn put_secret(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(name): Path<String>,
    Json(req): Json<PutSecretRequest>,
) -> ApiResult<Json<SecretMetadata>> {
    let metadata = state.secrets.put(&name, req.value).await?;
    tracing::info!(user = %user.username, session = %user.session, "Stored secret {} (version {})", name, metadata.version);
    Ok(Json(metadata))
}

pub async fn delete_secret(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.secrets.delete(&name).await?;
    tracing::info!(user = %user.username, session = %user.session, "Deleted secret {}", name);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListScriptsResponse {
    pub scripts: Vec<ScriptEntry>,
}

pub async fn list_scripts(State(state): State<Arc<AppState>>) -> ApiResult<Json<ListScriptsResponse>> {
    let dir = state.config.scripts_dir.clone();
    let scripts = tokio::task::spawn_blocking(move || scripts::list_scripts(&dir))
        .await
        .map_err(ApiError::internal)??;
    Ok(Json(ListScriptsResponse { scripts }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScriptResponse {
    pub name: String,
    pub source: String,
}

pub async fn get_script(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<ScriptResponse>> {
    let source = scripts::read_script(&state.config.scripts_dir, &name).await?;
    Ok(Json(ScriptResponse { name, source }))
}
