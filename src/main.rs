//! Service binary: load configuration, assemble the engine, serve HTTP.

use flowrunner::account::AccountService;
use flowrunner::config::{Config, StorageKind};
use flowrunner::node::registry::NodeRegistry;
use flowrunner::registry::FlowRegistry;
use flowrunner::runtime::FlowRuntime;
use flowrunner::server::{self, AppState};
use flowrunner::storage::{MemoryStorage, StorageProvider};
use flowrunner::vault::SecretVault;
use flowrunner::webhook::{HttpWebhookEmitter, WebhookEmitter};
use flowrunner::FlowrunnerError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Stop window for in-flight executions on shutdown.
const SHUTDOWN_WINDOW: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(error) = run().await {
        tracing::error!(%error, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), FlowrunnerError> {
    let config_path = std::env::var("FLOWRUNNER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("flowrunner.yaml"));
    let config = Config::load(&config_path)?;

    let storage = build_storage(&config).await?;
    storage.initialize().await?;

    let vault = Arc::new(SecretVault::from_hex_key(
        storage.clone(),
        &config.auth.encryption_key,
    )?);
    let accounts = Arc::new(AccountService::new(
        storage.clone(),
        config.auth.jwt_secret.clone().into_bytes(),
        config.auth.token_expiration_hours,
    ));
    let flows = Arc::new(FlowRegistry::new(storage.clone()));

    let mut node_registry = NodeRegistry::new();
    #[cfg(feature = "builtin-nodes")]
    flowrunner::node::builtin::register_builtin_nodes(&mut node_registry);
    let node_registry = node_registry.into_shared();

    let mut runtime = FlowRuntime::new(storage.clone(), vault.clone(), node_registry.clone());
    if !config.webhook.endpoint.is_empty() {
        let mut emitter =
            HttpWebhookEmitter::new(&config.webhook.endpoint, config.webhook.retry.clone());
        if !config.webhook.secret.is_empty() {
            emitter = emitter.with_secret(&config.webhook.secret);
        }
        let emitter: Arc<dyn WebhookEmitter> = Arc::new(emitter);
        runtime = runtime.with_webhooks(emitter);
    }
    let runtime = Arc::new(runtime);

    let state = AppState {
        accounts,
        flows,
        runtime: runtime.clone(),
        vault,
        node_registry,
    };

    let bind = format!("{}:{}", config.server.host, config.server.port);
    info!(%bind, storage = ?config.storage.kind, "flowrunner starting");

    let server = tokio::spawn(async move { server::serve(&bind, state).await });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| FlowrunnerError::Config(flowrunner::config::ConfigError::Io(e)))?;
    info!("shutdown signal received");
    runtime.shutdown(SHUTDOWN_WINDOW).await;
    server.abort();
    storage.close().await?;
    Ok(())
}

async fn build_storage(config: &Config) -> Result<Arc<dyn StorageProvider>, FlowrunnerError> {
    match config.storage.kind {
        StorageKind::Memory => Ok(Arc::new(MemoryStorage::new())),

        #[cfg(feature = "storage-database")]
        StorageKind::Postgres => {
            let storage =
                flowrunner::storage::DatabaseStorage::connect(&config.storage.postgres.url)
                    .await?;
            Ok(Arc::new(storage))
        }
        #[cfg(not(feature = "storage-database"))]
        StorageKind::Postgres => Err(FlowrunnerError::FeatureNotEnabled(
            "storage-postgres".to_string(),
        )),

        #[cfg(feature = "storage-dynamodb")]
        StorageKind::Dynamodb => {
            let storage = flowrunner::storage::DynamoStorage::connect(
                &config.storage.dynamodb.table_prefix,
                config.storage.dynamodb.endpoint.as_deref(),
            )
            .await;
            Ok(Arc::new(storage))
        }
        #[cfg(not(feature = "storage-dynamodb"))]
        StorageKind::Dynamodb => Err(FlowrunnerError::FeatureNotEnabled(
            "storage-dynamodb".to_string(),
        )),
    }
}
