//! Endpoint handlers.
//!
//! Thin adapters between HTTP shapes and the engine services. Handlers
//! own request/response DTOs and ownership checks; everything else lives
//! in the services they call.

use super::auth::AuthAccount;
use super::{ApiError, AppState};
use crate::flow::build_graph;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CredentialsBody {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub account_id: String,
    pub username: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<CredentialsBody>,
) -> Result<Json<LoginResponse>, ApiError> {
    let (account, token) = state.accounts.login(&body.username, &body.password).await?;
    Ok(Json(LoginResponse {
        token,
        account_id: account.id,
        username: account.username,
    }))
}

#[derive(Serialize)]
pub struct AccountResponse {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<crate::model::Account> for AccountResponse {
    fn from(account: crate::model::Account) -> Self {
        Self {
            id: account.id,
            username: account.username,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

pub async fn create_account(
    State(state): State<AppState>,
    Json(body): Json<CredentialsBody>,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    if body.username.is_empty() || body.password.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "username and password are required",
        ));
    }
    let account = state.accounts.create(&body.username, &body.password).await?;
    Ok((StatusCode::CREATED, Json(account.into())))
}

pub async fn whoami(auth: AuthAccount) -> Json<AccountResponse> {
    Json(auth.0.into())
}

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct FlowSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
}

impl From<crate::model::FlowMetadata> for FlowSummary {
    fn from(meta: crate::model::FlowMetadata) -> Self {
        Self {
            id: meta.id,
            name: meta.name,
            description: meta.description,
            version: meta.version,
            created_at: meta.created_at,
            updated_at: meta.updated_at,
            tags: meta.tags,
        }
    }
}

pub async fn list_flows(
    State(state): State<AppState>,
    auth: AuthAccount,
) -> Result<Json<Vec<FlowSummary>>, ApiError> {
    let flows = state.flows.list_flows(&auth.0.id).await?;
    Ok(Json(flows.into_iter().map(FlowSummary::from).collect()))
}

#[derive(Deserialize)]
pub struct CreateFlowBody {
    #[allow(dead_code)]
    pub name: Option<String>,
    pub content: String,
}

pub async fn create_flow(
    State(state): State<AppState>,
    auth: AuthAccount,
    Json(body): Json<CreateFlowBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    // Reject definitions that cannot compile before they are stored.
    build_graph(body.content.as_bytes(), &state.node_registry)?;
    let flow_id = state
        .flows
        .create_flow(&auth.0.id, body.content.as_bytes())
        .await?;
    Ok((StatusCode::CREATED, Json(json!({"id": flow_id}))))
}

pub async fn get_flow(
    State(state): State<AppState>,
    auth: AuthAccount,
    Path(flow_id): Path<String>,
) -> Result<Response, ApiError> {
    let definition = state.flows.get_flow(&auth.0.id, &flow_id).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/yaml")],
        definition,
    )
        .into_response())
}

#[derive(Deserialize)]
pub struct UpdateFlowBody {
    pub content: String,
}

pub async fn update_flow(
    State(state): State<AppState>,
    auth: AuthAccount,
    Path(flow_id): Path<String>,
    Json(body): Json<UpdateFlowBody>,
) -> Result<StatusCode, ApiError> {
    // Updating a missing flow is a 404, not an implicit create.
    state.flows.get_flow(&auth.0.id, &flow_id).await?;
    build_graph(body.content.as_bytes(), &state.node_registry)?;
    state
        .flows
        .save_flow(&auth.0.id, &flow_id, body.content.as_bytes(), None, None)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_flow(
    State(state): State<AppState>,
    auth: AuthAccount,
    Path(flow_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.flows.delete_flow(&auth.0.id, &flow_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct VersionSummary {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

pub async fn list_flow_versions(
    State(state): State<AppState>,
    auth: AuthAccount,
    Path(flow_id): Path<String>,
) -> Result<Json<Vec<VersionSummary>>, ApiError> {
    let versions = state.flows.list_versions(&auth.0.id, &flow_id).await?;
    Ok(Json(
        versions
            .into_iter()
            .map(|v| VersionSummary {
                version: v.version,
                created_at: v.created_at,
                created_by: v.created_by,
            })
            .collect(),
    ))
}

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct RunFlowBody {
    pub shared: Value,
}

pub async fn run_flow(
    State(state): State<AppState>,
    auth: AuthAccount,
    Path(flow_id): Path<String>,
    body: Option<Json<RunFlowBody>>,
) -> Result<Json<Value>, ApiError> {
    let shared = body.map(|Json(b)| b.shared).unwrap_or(Value::Null);
    let execution = state.runtime.trigger(&auth.0.id, &flow_id, shared).await?;
    Ok(Json(json!({
        "execution_id": execution.id,
        "status": execution.status,
    })))
}

pub async fn get_execution(
    State(state): State<AppState>,
    auth: AuthAccount,
    Path(execution_id): Path<String>,
) -> Result<Json<crate::model::Execution>, ApiError> {
    let execution = state.runtime.get_execution(&execution_id).await?;
    auth.ensure_owns(&execution.account_id)?;
    Ok(Json(execution))
}

pub async fn get_execution_logs(
    State(state): State<AppState>,
    auth: AuthAccount,
    Path(execution_id): Path<String>,
) -> Result<Json<Vec<crate::model::ExecutionLogEntry>>, ApiError> {
    let execution = state.runtime.get_execution(&execution_id).await?;
    auth.ensure_owns(&execution.account_id)?;
    Ok(Json(state.runtime.get_logs(&execution_id).await?))
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

pub async fn list_secret_keys(
    State(state): State<AppState>,
    auth: AuthAccount,
    Path(account_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    auth.ensure_owns(&account_id)?;
    let keys = state.vault.list_keys(&account_id).await?;
    Ok(Json(json!({"total": keys.len(), "keys": keys})))
}

pub async fn get_secret(
    State(state): State<AppState>,
    auth: AuthAccount,
    Path((account_id, key)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    auth.ensure_owns(&account_id)?;
    let value = state.vault.get(&account_id, &key).await?;
    Ok(Json(json!({"value": value})))
}

#[derive(Deserialize)]
pub struct SetSecretBody {
    pub value: String,
}

pub async fn set_secret(
    State(state): State<AppState>,
    auth: AuthAccount,
    Path((account_id, key)): Path<(String, String)>,
    Json(body): Json<SetSecretBody>,
) -> Result<StatusCode, ApiError> {
    auth.ensure_owns(&account_id)?;
    state.vault.set(&account_id, &key, &body.value).await?;
    Ok(StatusCode::CREATED)
}

pub async fn delete_secret(
    State(state): State<AppState>,
    auth: AuthAccount,
    Path((account_id, key)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    auth.ensure_owns(&account_id)?;
    state.vault.delete(&account_id, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}
