//! # HTTP API
//!
//! The REST surface over the engine: accounts and login, flow CRUD with
//! raw-YAML bodies, execution triggering and inspection, and per-account
//! secret management. All JSON unless noted. Authentication is
//! `Authorization: Bearer <token>` (API token or JWT) or HTTP basic;
//! every account-scoped path verifies the authenticated account owns the
//! resource.

pub mod auth;
pub mod handlers;

use crate::account::{AccountError, AccountService};
use crate::flow::LoaderError;
use crate::node::registry::NodeRegistry;
use crate::registry::FlowRegistry;
use crate::runtime::{FlowRuntime, RuntimeError};
use crate::storage::StorageError;
use crate::vault::{SecretVault, VaultError};
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<AccountService>,
    pub flows: Arc<FlowRegistry>,
    pub runtime: Arc<FlowRuntime>,
    pub vault: Arc<SecretVault>,
    pub node_registry: Arc<NodeRegistry>,
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/login", post(handlers::login))
        .route("/accounts", post(handlers::create_account))
        .route("/accounts/me", get(handlers::whoami))
        .route("/flows", get(handlers::list_flows).post(handlers::create_flow))
        .route(
            "/flows/:id",
            get(handlers::get_flow)
                .put(handlers::update_flow)
                .delete(handlers::delete_flow),
        )
        .route("/flows/:id/versions", get(handlers::list_flow_versions))
        .route("/flows/:id/run", post(handlers::run_flow))
        .route("/executions/:id", get(handlers::get_execution))
        .route("/executions/:id/logs", get(handlers::get_execution_logs))
        .route(
            "/accounts/:acct/secrets/keys",
            get(handlers::list_secret_keys),
        )
        .route(
            "/accounts/:acct/secrets/:key",
            get(handlers::get_secret)
                .post(handlers::set_secret)
                .delete(handlers::delete_secret),
        );

    Router::new()
        .nest("/api/v1", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process stops.
pub async fn serve(bind: &str, state: AppState) -> Result<(), std::io::Error> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await
}

/// API-level error with its HTTP mapping. Crypto and backend failures
/// stay generic on the wire.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "invalid credentials")
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden")
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = axum::Json(json!({"error": self.message}));
        (self.status, body).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match &error {
            StorageError::FlowNotFound(_)
            | StorageError::VersionNotFound { .. }
            | StorageError::SecretNotFound(_)
            | StorageError::ExecutionNotFound(_)
            | StorageError::AccountNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, error.to_string())
            }
            StorageError::SaveFailed(_) => Self::new(StatusCode::CONFLICT, error.to_string()),
            StorageError::Backend(detail) => {
                let correlation_id = uuid::Uuid::new_v4();
                error!(%correlation_id, %detail, "storage backend failure");
                Self::internal()
            }
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(error: AccountError) -> Self {
        match &error {
            AccountError::InvalidCredentials => Self::unauthorized(),
            AccountError::UsernameTaken(_) => Self::new(StatusCode::CONFLICT, error.to_string()),
            AccountError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, error.to_string()),
            AccountError::Token(_) => Self::unauthorized(),
            AccountError::Hashing => Self::internal(),
            AccountError::Storage(storage) => {
                let correlation_id = uuid::Uuid::new_v4();
                error!(%correlation_id, %storage, "account storage failure");
                Self::internal()
            }
        }
    }
}

impl From<VaultError> for ApiError {
    fn from(error: VaultError) -> Self {
        match error {
            VaultError::Storage(storage) => storage.into(),
            VaultError::SchemaViolation(_) | VaultError::NotJson(_) => {
                Self::new(StatusCode::BAD_REQUEST, error.to_string())
            }
            VaultError::FieldNotFound(path) => {
                Self::new(StatusCode::NOT_FOUND, format!("no value at path: {path}"))
            }
            // Crypto details never reach the wire.
            VaultError::Crypto(_) | VaultError::Envelope(_) => {
                let correlation_id = uuid::Uuid::new_v4();
                error!(%correlation_id, "vault crypto failure");
                Self::internal()
            }
        }
    }
}

impl From<LoaderError> for ApiError {
    fn from(error: LoaderError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error.to_string())
    }
}

impl From<RuntimeError> for ApiError {
    fn from(error: RuntimeError) -> Self {
        match error {
            RuntimeError::Storage(storage) => storage.into(),
            RuntimeError::Loader(loader) => loader.into(),
            RuntimeError::ExecutionNotFound(id) => {
                Self::new(StatusCode::NOT_FOUND, format!("execution not found: {id}"))
            }
            RuntimeError::ShuttingDown => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "shutting down")
            }
        }
    }
}
