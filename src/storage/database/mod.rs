//! Relational storage backend via SeaORM.
//!
//! One table per entity, composite primary keys matching the record
//! identities, single-row upserts (find, then insert or update), and
//! account-scoped range scans. Works against PostgreSQL in production
//! and SQLite for local runs and tests.

pub mod entities;
pub mod migration;

use super::{
    AccountStore, ExecutionStore, FlowStore, SecretStore, StorageError, StorageProvider,
    extract_definition_metadata,
};
use crate::model::{
    Account, Execution, ExecutionLogEntry, ExecutionStatus, FlowMetadata, FlowSearchFilter,
    FlowVersion, LogLevel, SecretRecord,
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect,
};
use sea_orm_migration::MigratorTrait;
use serde_json::Map;

/// SeaORM-backed implementation of the storage contract.
#[derive(Debug, Clone)]
pub struct DatabaseStorage {
    connection: DatabaseConnection,
}

impl DatabaseStorage {
    /// Connect to a database URL (`postgres://…` or `sqlite::memory:`).
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let connection = Database::connect(database_url)
            .await
            .map_err(db_error)?;
        Ok(Self { connection })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

fn db_error(error: sea_orm::DbErr) -> StorageError {
    StorageError::Backend(error.to_string())
}

fn flow_metadata_from_model(model: entities::flow::Model) -> FlowMetadata {
    FlowMetadata {
        id: model.flow_id,
        account_id: model.account_id,
        name: model.name,
        description: model.description,
        version: model.version,
        created_at: Some(model.created_at),
        updated_at: Some(model.updated_at),
        tags: serde_json::from_str(&model.tags).unwrap_or_default(),
        category: model.category,
        status: model.status,
        extra: Map::new(),
    }
}

#[async_trait]
impl FlowStore for DatabaseStorage {
    async fn save_flow(
        &self,
        account_id: &str,
        flow_id: &str,
        definition: &[u8],
    ) -> Result<(), StorageError> {
        let meta = extract_definition_metadata(definition);
        let tags = serde_json::to_string(&meta.tags).unwrap_or_else(|_| "[]".to_string());
        let now = Utc::now();

        let existing = entities::flow::Entity::find_by_id((
            account_id.to_string(),
            flow_id.to_string(),
        ))
        .one(&self.connection)
        .await
        .map_err(db_error)?;

        match existing {
            Some(model) => {
                let mut active: entities::flow::ActiveModel = model.into();
                active.definition = Set(definition.to_vec());
                active.name = Set(meta.name);
                active.description = Set(meta.description);
                active.version = Set(meta.version);
                active.tags = Set(tags);
                active.category = Set(meta.category);
                active.status = Set(meta.status);
                active.updated_at = Set(now);
                active.update(&self.connection).await.map_err(db_error)?;
            }
            None => {
                entities::flow::ActiveModel {
                    account_id: Set(account_id.to_string()),
                    flow_id: Set(flow_id.to_string()),
                    definition: Set(definition.to_vec()),
                    name: Set(meta.name),
                    description: Set(meta.description),
                    version: Set(meta.version),
                    tags: Set(tags),
                    category: Set(meta.category),
                    status: Set(meta.status),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&self.connection)
                .await
                .map_err(db_error)?;
            }
        }
        Ok(())
    }

    async fn get_flow(&self, account_id: &str, flow_id: &str) -> Result<Vec<u8>, StorageError> {
        entities::flow::Entity::find_by_id((account_id.to_string(), flow_id.to_string()))
            .one(&self.connection)
            .await
            .map_err(db_error)?
            .map(|model| model.definition)
            .ok_or_else(|| StorageError::FlowNotFound(flow_id.to_string()))
    }

    async fn get_flow_metadata(
        &self,
        account_id: &str,
        flow_id: &str,
    ) -> Result<FlowMetadata, StorageError> {
        entities::flow::Entity::find_by_id((account_id.to_string(), flow_id.to_string()))
            .one(&self.connection)
            .await
            .map_err(db_error)?
            .map(flow_metadata_from_model)
            .ok_or_else(|| StorageError::FlowNotFound(flow_id.to_string()))
    }

    async fn delete_flow(&self, account_id: &str, flow_id: &str) -> Result<(), StorageError> {
        let outcome = entities::flow::Entity::delete_by_id((
            account_id.to_string(),
            flow_id.to_string(),
        ))
        .exec(&self.connection)
        .await
        .map_err(db_error)?;
        if outcome.rows_affected == 0 {
            return Err(StorageError::FlowNotFound(flow_id.to_string()));
        }

        // Versions travel with the flow.
        entities::flow_version::Entity::delete_many()
            .filter(entities::flow_version::Column::AccountId.eq(account_id))
            .filter(entities::flow_version::Column::FlowId.eq(flow_id))
            .exec(&self.connection)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn list_flows(&self, account_id: &str) -> Result<Vec<FlowMetadata>, StorageError> {
        let models = entities::flow::Entity::find()
            .filter(entities::flow::Column::AccountId.eq(account_id))
            .order_by_asc(entities::flow::Column::FlowId)
            .all(&self.connection)
            .await
            .map_err(db_error)?;
        Ok(models.into_iter().map(flow_metadata_from_model).collect())
    }

    async fn save_flow_version(&self, version: &FlowVersion) -> Result<(), StorageError> {
        let existing = entities::flow_version::Entity::find_by_id((
            version.account_id.clone(),
            version.flow_id.clone(),
            version.version.clone(),
        ))
        .one(&self.connection)
        .await
        .map_err(db_error)?;
        if existing.is_some() {
            return Err(StorageError::SaveFailed(format!(
                "duplicate version {} for flow {}",
                version.version, version.flow_id
            )));
        }

        entities::flow_version::ActiveModel {
            account_id: Set(version.account_id.clone()),
            flow_id: Set(version.flow_id.clone()),
            version: Set(version.version.clone()),
            definition: Set(version.definition.clone()),
            description: Set(version.description.clone()),
            created_at: Set(version.created_at),
            created_by: Set(version.created_by.clone()),
        }
        .insert(&self.connection)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_flow_version(
        &self,
        account_id: &str,
        flow_id: &str,
        version: &str,
    ) -> Result<FlowVersion, StorageError> {
        entities::flow_version::Entity::find_by_id((
            account_id.to_string(),
            flow_id.to_string(),
            version.to_string(),
        ))
        .one(&self.connection)
        .await
        .map_err(db_error)?
        .map(|model| FlowVersion {
            account_id: model.account_id,
            flow_id: model.flow_id,
            version: model.version,
            definition: model.definition,
            description: model.description,
            created_at: model.created_at,
            created_by: model.created_by,
        })
        .ok_or_else(|| StorageError::VersionNotFound {
            flow_id: flow_id.to_string(),
            version: version.to_string(),
        })
    }

    async fn list_flow_versions(
        &self,
        account_id: &str,
        flow_id: &str,
    ) -> Result<Vec<FlowVersion>, StorageError> {
        let models = entities::flow_version::Entity::find()
            .filter(entities::flow_version::Column::AccountId.eq(account_id))
            .filter(entities::flow_version::Column::FlowId.eq(flow_id))
            .order_by_asc(entities::flow_version::Column::CreatedAt)
            .all(&self.connection)
            .await
            .map_err(db_error)?;
        Ok(models
            .into_iter()
            .map(|model| FlowVersion {
                account_id: model.account_id,
                flow_id: model.flow_id,
                version: model.version,
                definition: model.definition,
                description: model.description,
                created_at: model.created_at,
                created_by: model.created_by,
            })
            .collect())
    }

    async fn search_flows(
        &self,
        account_id: &str,
        filter: &FlowSearchFilter,
    ) -> Result<Vec<FlowMetadata>, StorageError> {
        // Pushdown the cheap equality filters; post-filter the rest.
        let mut query = entities::flow::Entity::find()
            .filter(entities::flow::Column::AccountId.eq(account_id));
        if let Some(category) = &filter.category {
            query = query.filter(entities::flow::Column::Category.eq(category));
        }
        if let Some(status) = &filter.status {
            query = query.filter(entities::flow::Column::Status.eq(status));
        }

        let models = query
            .order_by_asc(entities::flow::Column::FlowId)
            .all(&self.connection)
            .await
            .map_err(db_error)?;
        let matched: Vec<FlowMetadata> = models
            .into_iter()
            .map(flow_metadata_from_model)
            .filter(|meta| filter.matches(meta))
            .collect();
        Ok(filter.paginate(matched))
    }
}

#[async_trait]
impl SecretStore for DatabaseStorage {
    async fn save_secret(&self, record: &SecretRecord) -> Result<(), StorageError> {
        let existing = entities::secret::Entity::find_by_id((
            record.account_id.clone(),
            record.key.clone(),
        ))
        .one(&self.connection)
        .await
        .map_err(db_error)?;

        match existing {
            Some(model) => {
                let mut active: entities::secret::ActiveModel = model.into();
                active.value = Set(record.value.clone());
                active.updated_at = Set(Utc::now());
                active.update(&self.connection).await.map_err(db_error)?;
            }
            None => {
                entities::secret::ActiveModel {
                    account_id: Set(record.account_id.clone()),
                    key: Set(record.key.clone()),
                    value: Set(record.value.clone()),
                    created_at: Set(record.created_at),
                    updated_at: Set(record.updated_at),
                }
                .insert(&self.connection)
                .await
                .map_err(db_error)?;
            }
        }
        Ok(())
    }

    async fn get_secret(&self, account_id: &str, key: &str) -> Result<SecretRecord, StorageError> {
        entities::secret::Entity::find_by_id((account_id.to_string(), key.to_string()))
            .one(&self.connection)
            .await
            .map_err(db_error)?
            .map(|model| SecretRecord {
                account_id: model.account_id,
                key: model.key,
                value: model.value,
                created_at: model.created_at,
                updated_at: model.updated_at,
            })
            .ok_or_else(|| StorageError::SecretNotFound(key.to_string()))
    }

    async fn delete_secret(&self, account_id: &str, key: &str) -> Result<(), StorageError> {
        let outcome = entities::secret::Entity::delete_by_id((
            account_id.to_string(),
            key.to_string(),
        ))
        .exec(&self.connection)
        .await
        .map_err(db_error)?;
        if outcome.rows_affected == 0 {
            return Err(StorageError::SecretNotFound(key.to_string()));
        }
        Ok(())
    }

    async fn list_secrets(&self, account_id: &str) -> Result<Vec<SecretRecord>, StorageError> {
        let models = entities::secret::Entity::find()
            .filter(entities::secret::Column::AccountId.eq(account_id))
            .order_by_asc(entities::secret::Column::Key)
            .all(&self.connection)
            .await
            .map_err(db_error)?;
        Ok(models
            .into_iter()
            .map(|model| SecretRecord {
                account_id: model.account_id,
                key: model.key,
                value: model.value,
                created_at: model.created_at,
                updated_at: model.updated_at,
            })
            .collect())
    }
}

fn execution_to_model(execution: &Execution) -> entities::execution::ActiveModel {
    entities::execution::ActiveModel {
        id: Set(execution.id.clone()),
        flow_id: Set(execution.flow_id.clone()),
        account_id: Set(execution.account_id.clone()),
        status: Set(execution.status.to_string()),
        start_time: Set(execution.start_time),
        end_time: Set(execution.end_time),
        progress: Set(execution.progress),
        current_node_id: Set(execution.current_node_id.clone()),
        results: Set(serde_json::to_string(&execution.results).unwrap_or_else(|_| "{}".into())),
        error: Set(execution.error.clone()),
        metadata: Set(serde_json::to_string(&execution.metadata).unwrap_or_else(|_| "{}".into())),
    }
}

fn execution_from_model(model: entities::execution::Model) -> Execution {
    let status = match model.status.as_str() {
        "pending" => ExecutionStatus::Pending,
        "running" => ExecutionStatus::Running,
        "completed" => ExecutionStatus::Completed,
        "cancelled" => ExecutionStatus::Cancelled,
        _ => ExecutionStatus::Failed,
    };
    Execution {
        id: model.id,
        flow_id: model.flow_id,
        account_id: model.account_id,
        status,
        start_time: model.start_time,
        end_time: model.end_time,
        progress: model.progress,
        current_node_id: model.current_node_id,
        results: serde_json::from_str(&model.results).unwrap_or_default(),
        error: model.error,
        metadata: serde_json::from_str(&model.metadata).unwrap_or_default(),
    }
}

#[async_trait]
impl ExecutionStore for DatabaseStorage {
    async fn save_execution(&self, execution: &Execution) -> Result<(), StorageError> {
        let existing = entities::execution::Entity::find_by_id(execution.id.clone())
            .one(&self.connection)
            .await
            .map_err(db_error)?;

        let active = execution_to_model(execution);
        if existing.is_some() {
            active.update(&self.connection).await.map_err(db_error)?;
        } else {
            active.insert(&self.connection).await.map_err(db_error)?;
        }
        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Execution, StorageError> {
        entities::execution::Entity::find_by_id(execution_id.to_string())
            .one(&self.connection)
            .await
            .map_err(db_error)?
            .map(execution_from_model)
            .ok_or_else(|| StorageError::ExecutionNotFound(execution_id.to_string()))
    }

    async fn list_executions(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<Execution>, StorageError> {
        let mut query = entities::execution::Entity::find()
            .filter(entities::execution::Column::AccountId.eq(account_id))
            .order_by_desc(entities::execution::Column::StartTime);
        if limit > 0 {
            query = query.limit(limit as u64);
        }
        let models = query.all(&self.connection).await.map_err(db_error)?;
        Ok(models.into_iter().map(execution_from_model).collect())
    }

    async fn append_log(&self, entry: &ExecutionLogEntry) -> Result<(), StorageError> {
        let data = entry
            .data
            .as_ref()
            .map(|value| serde_json::to_string(value).unwrap_or_else(|_| "null".into()));
        entities::execution_log::ActiveModel {
            id: NotSet,
            execution_id: Set(entry.execution_id.clone()),
            timestamp: Set(entry.timestamp),
            node_id: Set(entry.node_id.clone()),
            level: Set(entry.level.to_string()),
            message: Set(entry.message.clone()),
            data: Set(data),
        }
        .insert(&self.connection)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_logs(
        &self,
        execution_id: &str,
    ) -> Result<Vec<ExecutionLogEntry>, StorageError> {
        let models = entities::execution_log::Entity::find()
            .filter(entities::execution_log::Column::ExecutionId.eq(execution_id))
            .order_by_asc(entities::execution_log::Column::Timestamp)
            .order_by_asc(entities::execution_log::Column::Id)
            .all(&self.connection)
            .await
            .map_err(db_error)?;
        Ok(models
            .into_iter()
            .map(|model| {
                let level = match model.level.as_str() {
                    "debug" => LogLevel::Debug,
                    "warn" => LogLevel::Warn,
                    "error" => LogLevel::Error,
                    _ => LogLevel::Info,
                };
                ExecutionLogEntry {
                    execution_id: model.execution_id,
                    timestamp: model.timestamp,
                    node_id: model.node_id,
                    level,
                    message: model.message,
                    data: model
                        .data
                        .as_deref()
                        .and_then(|raw| serde_json::from_str(raw).ok()),
                }
            })
            .collect())
    }
}

#[async_trait]
impl AccountStore for DatabaseStorage {
    async fn save_account(&self, account: &Account) -> Result<(), StorageError> {
        let existing = entities::account::Entity::find_by_id(account.id.clone())
            .one(&self.connection)
            .await
            .map_err(db_error)?;

        let active = entities::account::ActiveModel {
            id: Set(account.id.clone()),
            username: Set(account.username.clone()),
            password_hash: Set(account.password_hash.clone()),
            api_token: Set(account.api_token.clone()),
            created_at: Set(account.created_at),
            updated_at: Set(account.updated_at),
        };

        // The unique indexes on username and api_token turn duplicates
        // into constraint violations; surface them as save failures.
        let outcome = if existing.is_some() {
            active.update(&self.connection).await.map(|_| ())
        } else {
            active.insert(&self.connection).await.map(|_| ())
        };
        outcome.map_err(|error| {
            StorageError::SaveFailed(format!(
                "duplicate username or token: {} ({error})",
                account.username
            ))
        })
    }

    async fn get_account(&self, account_id: &str) -> Result<Account, StorageError> {
        entities::account::Entity::find_by_id(account_id.to_string())
            .one(&self.connection)
            .await
            .map_err(db_error)?
            .map(account_from_model)
            .ok_or_else(|| StorageError::AccountNotFound(account_id.to_string()))
    }

    async fn get_account_by_username(&self, username: &str) -> Result<Account, StorageError> {
        entities::account::Entity::find()
            .filter(entities::account::Column::Username.eq(username))
            .one(&self.connection)
            .await
            .map_err(db_error)?
            .map(account_from_model)
            .ok_or_else(|| StorageError::AccountNotFound(username.to_string()))
    }

    async fn get_account_by_token(&self, api_token: &str) -> Result<Account, StorageError> {
        entities::account::Entity::find()
            .filter(entities::account::Column::ApiToken.eq(api_token))
            .one(&self.connection)
            .await
            .map_err(db_error)?
            .map(account_from_model)
            .ok_or_else(|| StorageError::AccountNotFound("token".to_string()))
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        let models = entities::account::Entity::find()
            .order_by_asc(entities::account::Column::Username)
            .all(&self.connection)
            .await
            .map_err(db_error)?;
        Ok(models.into_iter().map(account_from_model).collect())
    }

    async fn delete_account(&self, account_id: &str) -> Result<(), StorageError> {
        let outcome = entities::account::Entity::delete_by_id(account_id.to_string())
            .exec(&self.connection)
            .await
            .map_err(db_error)?;
        if outcome.rows_affected == 0 {
            return Err(StorageError::AccountNotFound(account_id.to_string()));
        }
        Ok(())
    }
}

fn account_from_model(model: entities::account::Model) -> Account {
    Account {
        id: model.id,
        username: model.username,
        password_hash: model.password_hash,
        api_token: model.api_token,
        created_at: model.created_at,
        updated_at: model.updated_at,
    }
}

#[async_trait]
impl StorageProvider for DatabaseStorage {
    fn flows(&self) -> &dyn FlowStore {
        self
    }

    fn secrets(&self) -> &dyn SecretStore {
        self
    }

    fn executions(&self) -> &dyn ExecutionStore {
        self
    }

    fn accounts(&self) -> &dyn AccountStore {
        self
    }

    async fn initialize(&self) -> Result<(), StorageError> {
        migration::Migrator::up(&self.connection, None)
            .await
            .map_err(db_error)
    }

    async fn close(&self) -> Result<(), StorageError> {
        // Dropping the connection pool closes it; nothing to flush.
        Ok(())
    }
}
