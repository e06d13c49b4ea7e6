//! DynamoDB wide-column storage backend.
//!
//! Key layout:
//! - flows / secrets: partition key = account id, range key = flow id /
//!   secret key. Flow versions partition on `account_id#flow_id` with the
//!   version as range key.
//! - executions: keyed by execution id, with a global secondary index on
//!   (account id, start time) for account-scoped listings.
//! - accounts: keyed by account id, with GSIs on username and API token.
//!
//! Timestamps are stored as integer Unix seconds for sortability and
//! converted at the edge; log entries key on nanoseconds so an
//! execution's stream stays totally ordered.

use super::{
    AccountStore, ExecutionStore, FlowStore, SecretStore, StorageError, StorageProvider,
    extract_definition_metadata,
};
use crate::model::{
    Account, Execution, ExecutionLogEntry, ExecutionStatus, FlowMetadata, FlowSearchFilter,
    FlowVersion, LogLevel, SecretRecord,
};
use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, GlobalSecondaryIndex, KeySchemaElement,
    KeyType, Projection, ProjectionType, ScalarAttributeType,
};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;

type Item = HashMap<String, AttributeValue>;

/// DynamoDB implementation of the storage contract.
#[derive(Debug, Clone)]
pub struct DynamoStorage {
    client: Client,
    prefix: String,
}

impl DynamoStorage {
    /// Build against the ambient AWS configuration, with an optional
    /// endpoint override for local DynamoDB.
    pub async fn connect(table_prefix: &str, endpoint: Option<&str>) -> Self {
        let base = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = match endpoint {
            Some(endpoint) => {
                let conf = aws_sdk_dynamodb::config::Builder::from(&base)
                    .endpoint_url(endpoint)
                    .build();
                Client::from_conf(conf)
            }
            None => Client::new(&base),
        };
        Self {
            client,
            prefix: table_prefix.to_string(),
        }
    }

    fn table(&self, name: &str) -> String {
        format!("{}_{name}", self.prefix)
    }

    async fn ensure_table(
        &self,
        name: &str,
        hash: (&str, ScalarAttributeType),
        range: Option<(&str, ScalarAttributeType)>,
        gsis: Vec<(&str, &str, ScalarAttributeType, Option<(&str, ScalarAttributeType)>)>,
    ) -> Result<(), StorageError> {
        let table = self.table(name);
        if self
            .client
            .describe_table()
            .table_name(&table)
            .send()
            .await
            .is_ok()
        {
            return Ok(());
        }

        let mut attributes = vec![attribute_definition(hash.0, hash.1)?];
        let mut key_schema = vec![key_element(hash.0, KeyType::Hash)?];
        if let Some((range_name, range_type)) = range {
            attributes.push(attribute_definition(range_name, range_type)?);
            key_schema.push(key_element(range_name, KeyType::Range)?);
        }

        let mut request = self
            .client
            .create_table()
            .table_name(&table)
            .billing_mode(BillingMode::PayPerRequest);

        for (index_name, gsi_hash, gsi_hash_type, gsi_range) in gsis {
            attributes.push(attribute_definition(gsi_hash, gsi_hash_type)?);
            let mut schema = vec![key_element(gsi_hash, KeyType::Hash)?];
            if let Some((range_name, range_type)) = gsi_range {
                attributes.push(attribute_definition(range_name, range_type)?);
                schema.push(key_element(range_name, KeyType::Range)?);
            }
            let index = GlobalSecondaryIndex::builder()
                .index_name(index_name)
                .set_key_schema(Some(schema))
                .projection(
                    Projection::builder()
                        .projection_type(ProjectionType::All)
                        .build(),
                )
                .build()
                .map_err(backend_error)?;
            request = request.global_secondary_indexes(index);
        }

        // Attribute definitions may repeat across the base table and
        // GSIs; DynamoDB rejects duplicates.
        attributes.sort_by(|a, b| a.attribute_name.cmp(&b.attribute_name));
        attributes.dedup_by(|a, b| a.attribute_name == b.attribute_name);

        request
            .set_attribute_definitions(Some(attributes))
            .set_key_schema(Some(key_schema))
            .send()
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn put(&self, table: &str, item: Item) -> Result<(), StorageError> {
        self.client
            .put_item()
            .table_name(self.table(table))
            .set_item(Some(item))
            .send()
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn get(&self, table: &str, key: Item) -> Result<Option<Item>, StorageError> {
        let output = self
            .client
            .get_item()
            .table_name(self.table(table))
            .set_key(Some(key))
            .send()
            .await
            .map_err(backend_error)?;
        Ok(output.item)
    }

    async fn query_partition(
        &self,
        table: &str,
        key_name: &str,
        key_value: &str,
    ) -> Result<Vec<Item>, StorageError> {
        let output = self
            .client
            .query()
            .table_name(self.table(table))
            .key_condition_expression("#pk = :pk")
            .expression_attribute_names("#pk", key_name)
            .expression_attribute_values(":pk", AttributeValue::S(key_value.to_string()))
            .send()
            .await
            .map_err(backend_error)?;
        Ok(output.items.unwrap_or_default())
    }
}

fn backend_error(error: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(error.to_string())
}

fn attribute_definition(
    name: &str,
    kind: ScalarAttributeType,
) -> Result<AttributeDefinition, StorageError> {
    AttributeDefinition::builder()
        .attribute_name(name)
        .attribute_type(kind)
        .build()
        .map_err(backend_error)
}

fn key_element(name: &str, key_type: KeyType) -> Result<KeySchemaElement, StorageError> {
    KeySchemaElement::builder()
        .attribute_name(name)
        .key_type(key_type)
        .build()
        .map_err(backend_error)
}

// --- attribute helpers ------------------------------------------------------

fn s(value: impl Into<String>) -> AttributeValue {
    AttributeValue::S(value.into())
}

fn n(value: i64) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

fn read_s(item: &Item, key: &str) -> String {
    item.get(key)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .unwrap_or_default()
}

fn read_opt_s(item: &Item, key: &str) -> Option<String> {
    item.get(key).and_then(|v| v.as_s().ok()).cloned()
}

fn read_n(item: &Item, key: &str) -> Option<i64> {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|raw| raw.parse().ok())
}

fn read_f(item: &Item, key: &str) -> f64 {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0.0)
}

fn to_secs(time: DateTime<Utc>) -> i64 {
    time.timestamp()
}

fn from_secs(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn version_partition(account_id: &str, flow_id: &str) -> String {
    format!("{account_id}#{flow_id}")
}

#[async_trait]
impl FlowStore for DynamoStorage {
    async fn save_flow(
        &self,
        account_id: &str,
        flow_id: &str,
        definition: &[u8],
    ) -> Result<(), StorageError> {
        let meta = extract_definition_metadata(definition);
        let now = to_secs(Utc::now());

        let existing_created = self
            .get(
                "flows",
                HashMap::from([
                    ("account_id".to_string(), s(account_id)),
                    ("flow_id".to_string(), s(flow_id)),
                ]),
            )
            .await?
            .and_then(|item| read_n(&item, "created_at"));

        let mut item: Item = HashMap::from([
            ("account_id".to_string(), s(account_id)),
            ("flow_id".to_string(), s(flow_id)),
            (
                "definition".to_string(),
                AttributeValue::B(Blob::new(definition)),
            ),
            ("name".to_string(), s(meta.name)),
            ("description".to_string(), s(meta.description)),
            ("version".to_string(), s(meta.version)),
            (
                "tags".to_string(),
                s(serde_json::to_string(&meta.tags).unwrap_or_else(|_| "[]".into())),
            ),
            ("category".to_string(), s(meta.category)),
            ("status".to_string(), s(meta.status)),
            ("updated_at".to_string(), n(now)),
        ]);
        item.insert(
            "created_at".to_string(),
            n(existing_created.unwrap_or(now)),
        );

        self.put("flows", item).await
    }

    async fn get_flow(&self, account_id: &str, flow_id: &str) -> Result<Vec<u8>, StorageError> {
        let item = self
            .get(
                "flows",
                HashMap::from([
                    ("account_id".to_string(), s(account_id)),
                    ("flow_id".to_string(), s(flow_id)),
                ]),
            )
            .await?
            .ok_or_else(|| StorageError::FlowNotFound(flow_id.to_string()))?;
        item.get("definition")
            .and_then(|v| v.as_b().ok())
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| StorageError::FlowNotFound(flow_id.to_string()))
    }

    async fn get_flow_metadata(
        &self,
        account_id: &str,
        flow_id: &str,
    ) -> Result<FlowMetadata, StorageError> {
        let item = self
            .get(
                "flows",
                HashMap::from([
                    ("account_id".to_string(), s(account_id)),
                    ("flow_id".to_string(), s(flow_id)),
                ]),
            )
            .await?
            .ok_or_else(|| StorageError::FlowNotFound(flow_id.to_string()))?;
        Ok(flow_metadata_from_item(&item))
    }

    async fn delete_flow(&self, account_id: &str, flow_id: &str) -> Result<(), StorageError> {
        // Existence check first so a missing flow is a 404-class error.
        self.get_flow(account_id, flow_id).await?;

        self.client
            .delete_item()
            .table_name(self.table("flows"))
            .key("account_id", s(account_id))
            .key("flow_id", s(flow_id))
            .send()
            .await
            .map_err(backend_error)?;

        // DynamoDB has no cascade; issue per-version deletes.
        let partition = version_partition(account_id, flow_id);
        let versions = self
            .query_partition("flow_versions", "flow_key", &partition)
            .await?;
        for item in versions {
            let version = read_s(&item, "version");
            self.client
                .delete_item()
                .table_name(self.table("flow_versions"))
                .key("flow_key", s(&partition))
                .key("version", s(version))
                .send()
                .await
                .map_err(backend_error)?;
        }
        Ok(())
    }

    async fn list_flows(&self, account_id: &str) -> Result<Vec<FlowMetadata>, StorageError> {
        let items = self
            .query_partition("flows", "account_id", account_id)
            .await?;
        let mut flows: Vec<FlowMetadata> =
            items.iter().map(flow_metadata_from_item).collect();
        flows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(flows)
    }

    async fn save_flow_version(&self, version: &FlowVersion) -> Result<(), StorageError> {
        let partition = version_partition(&version.account_id, &version.flow_id);
        let existing = self
            .get(
                "flow_versions",
                HashMap::from([
                    ("flow_key".to_string(), s(&partition)),
                    ("version".to_string(), s(&version.version)),
                ]),
            )
            .await?;
        if existing.is_some() {
            return Err(StorageError::SaveFailed(format!(
                "duplicate version {} for flow {}",
                version.version, version.flow_id
            )));
        }

        let mut item: Item = HashMap::from([
            ("flow_key".to_string(), s(&partition)),
            ("account_id".to_string(), s(&version.account_id)),
            ("flow_id".to_string(), s(&version.flow_id)),
            ("version".to_string(), s(&version.version)),
            (
                "definition".to_string(),
                AttributeValue::B(Blob::new(version.definition.clone())),
            ),
            ("description".to_string(), s(&version.description)),
            ("created_at".to_string(), n(to_secs(version.created_at))),
        ]);
        if let Some(created_by) = &version.created_by {
            item.insert("created_by".to_string(), s(created_by));
        }
        self.put("flow_versions", item).await
    }

    async fn get_flow_version(
        &self,
        account_id: &str,
        flow_id: &str,
        version: &str,
    ) -> Result<FlowVersion, StorageError> {
        let partition = version_partition(account_id, flow_id);
        let item = self
            .get(
                "flow_versions",
                HashMap::from([
                    ("flow_key".to_string(), s(&partition)),
                    ("version".to_string(), s(version)),
                ]),
            )
            .await?
            .ok_or_else(|| StorageError::VersionNotFound {
                flow_id: flow_id.to_string(),
                version: version.to_string(),
            })?;
        Ok(flow_version_from_item(&item))
    }

    async fn list_flow_versions(
        &self,
        account_id: &str,
        flow_id: &str,
    ) -> Result<Vec<FlowVersion>, StorageError> {
        let partition = version_partition(account_id, flow_id);
        let items = self
            .query_partition("flow_versions", "flow_key", &partition)
            .await?;
        let mut versions: Vec<FlowVersion> =
            items.iter().map(flow_version_from_item).collect();
        versions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(versions)
    }

    async fn search_flows(
        &self,
        account_id: &str,
        filter: &FlowSearchFilter,
    ) -> Result<Vec<FlowMetadata>, StorageError> {
        // Partition query, then post-filter; DynamoDB offers no cheap
        // pushdown for substring or tag predicates.
        let all = self.list_flows(account_id).await?;
        let matched: Vec<FlowMetadata> =
            all.into_iter().filter(|meta| filter.matches(meta)).collect();
        Ok(filter.paginate(matched))
    }
}

fn flow_metadata_from_item(item: &Item) -> FlowMetadata {
    FlowMetadata {
        id: read_s(item, "flow_id"),
        account_id: read_s(item, "account_id"),
        name: read_s(item, "name"),
        description: read_s(item, "description"),
        version: read_s(item, "version"),
        created_at: read_n(item, "created_at").map(from_secs),
        updated_at: read_n(item, "updated_at").map(from_secs),
        tags: serde_json::from_str(&read_s(item, "tags")).unwrap_or_default(),
        category: read_s(item, "category"),
        status: read_s(item, "status"),
        extra: serde_json::Map::new(),
    }
}

fn flow_version_from_item(item: &Item) -> FlowVersion {
    FlowVersion {
        account_id: read_s(item, "account_id"),
        flow_id: read_s(item, "flow_id"),
        version: read_s(item, "version"),
        definition: item
            .get("definition")
            .and_then(|v| v.as_b().ok())
            .map(|blob| blob.as_ref().to_vec())
            .unwrap_or_default(),
        description: read_s(item, "description"),
        created_at: read_n(item, "created_at").map(from_secs).unwrap_or_else(Utc::now),
        created_by: read_opt_s(item, "created_by"),
    }
}

#[async_trait]
impl SecretStore for DynamoStorage {
    async fn save_secret(&self, record: &SecretRecord) -> Result<(), StorageError> {
        let existing_created = self
            .get(
                "secrets",
                HashMap::from([
                    ("account_id".to_string(), s(&record.account_id)),
                    ("key".to_string(), s(&record.key)),
                ]),
            )
            .await?
            .and_then(|item| read_n(&item, "created_at"));

        let item: Item = HashMap::from([
            ("account_id".to_string(), s(&record.account_id)),
            ("key".to_string(), s(&record.key)),
            ("value".to_string(), s(&record.value)),
            (
                "created_at".to_string(),
                n(existing_created.unwrap_or_else(|| to_secs(record.created_at))),
            ),
            ("updated_at".to_string(), n(to_secs(Utc::now()))),
        ]);
        self.put("secrets", item).await
    }

    async fn get_secret(&self, account_id: &str, key: &str) -> Result<SecretRecord, StorageError> {
        let item = self
            .get(
                "secrets",
                HashMap::from([
                    ("account_id".to_string(), s(account_id)),
                    ("key".to_string(), s(key)),
                ]),
            )
            .await?
            .ok_or_else(|| StorageError::SecretNotFound(key.to_string()))?;
        Ok(secret_from_item(&item))
    }

    async fn delete_secret(&self, account_id: &str, key: &str) -> Result<(), StorageError> {
        self.get_secret(account_id, key).await?;
        self.client
            .delete_item()
            .table_name(self.table("secrets"))
            .key("account_id", s(account_id))
            .key("key", s(key))
            .send()
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn list_secrets(&self, account_id: &str) -> Result<Vec<SecretRecord>, StorageError> {
        let items = self
            .query_partition("secrets", "account_id", account_id)
            .await?;
        let mut secrets: Vec<SecretRecord> = items.iter().map(secret_from_item).collect();
        secrets.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(secrets)
    }
}

fn secret_from_item(item: &Item) -> SecretRecord {
    SecretRecord {
        account_id: read_s(item, "account_id"),
        key: read_s(item, "key"),
        value: read_s(item, "value"),
        created_at: read_n(item, "created_at").map(from_secs).unwrap_or_else(Utc::now),
        updated_at: read_n(item, "updated_at").map(from_secs).unwrap_or_else(Utc::now),
    }
}

#[async_trait]
impl ExecutionStore for DynamoStorage {
    async fn save_execution(&self, execution: &Execution) -> Result<(), StorageError> {
        let mut item: Item = HashMap::from([
            ("id".to_string(), s(&execution.id)),
            ("flow_id".to_string(), s(&execution.flow_id)),
            ("account_id".to_string(), s(&execution.account_id)),
            ("status".to_string(), s(execution.status.to_string())),
            ("start_time".to_string(), n(to_secs(execution.start_time))),
            (
                "progress".to_string(),
                AttributeValue::N(execution.progress.to_string()),
            ),
            (
                "results".to_string(),
                s(serde_json::to_string(&execution.results).unwrap_or_else(|_| "{}".into())),
            ),
            (
                "metadata".to_string(),
                s(serde_json::to_string(&execution.metadata).unwrap_or_else(|_| "{}".into())),
            ),
        ]);
        if let Some(end_time) = execution.end_time {
            item.insert("end_time".to_string(), n(to_secs(end_time)));
        }
        if let Some(node_id) = &execution.current_node_id {
            item.insert("current_node_id".to_string(), s(node_id));
        }
        if let Some(error) = &execution.error {
            item.insert("error".to_string(), s(error));
        }
        self.put("executions", item).await
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Execution, StorageError> {
        let item = self
            .get(
                "executions",
                HashMap::from([("id".to_string(), s(execution_id))]),
            )
            .await?
            .ok_or_else(|| StorageError::ExecutionNotFound(execution_id.to_string()))?;
        Ok(execution_from_item(&item))
    }

    async fn list_executions(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<Execution>, StorageError> {
        let mut query = self
            .client
            .query()
            .table_name(self.table("executions"))
            .index_name("account-start-index")
            .key_condition_expression("#pk = :pk")
            .expression_attribute_names("#pk", "account_id")
            .expression_attribute_values(":pk", s(account_id))
            .scan_index_forward(false);
        if limit > 0 {
            query = query.limit(limit as i32);
        }
        let output = query.send().await.map_err(backend_error)?;
        Ok(output
            .items
            .unwrap_or_default()
            .iter()
            .map(execution_from_item)
            .collect())
    }

    async fn append_log(&self, entry: &ExecutionLogEntry) -> Result<(), StorageError> {
        let nanos = entry
            .timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| entry.timestamp.timestamp_micros().saturating_mul(1000));
        let mut item: Item = HashMap::from([
            ("execution_id".to_string(), s(&entry.execution_id)),
            ("ts".to_string(), n(nanos)),
            ("level".to_string(), s(entry.level.to_string())),
            ("message".to_string(), s(&entry.message)),
        ]);
        if let Some(node_id) = &entry.node_id {
            item.insert("node_id".to_string(), s(node_id));
        }
        if let Some(data) = &entry.data {
            item.insert(
                "data".to_string(),
                s(serde_json::to_string(data).unwrap_or_else(|_| "null".into())),
            );
        }
        self.put("execution_logs", item).await
    }

    async fn get_logs(
        &self,
        execution_id: &str,
    ) -> Result<Vec<ExecutionLogEntry>, StorageError> {
        let items = self
            .query_partition("execution_logs", "execution_id", execution_id)
            .await?;
        let mut entries: Vec<ExecutionLogEntry> = items
            .iter()
            .map(|item| {
                let nanos = read_n(item, "ts").unwrap_or_default();
                let level = match read_s(item, "level").as_str() {
                    "debug" => LogLevel::Debug,
                    "warn" => LogLevel::Warn,
                    "error" => LogLevel::Error,
                    _ => LogLevel::Info,
                };
                ExecutionLogEntry {
                    execution_id: read_s(item, "execution_id"),
                    timestamp: Utc
                        .timestamp_nanos(nanos),
                    node_id: read_opt_s(item, "node_id"),
                    level,
                    message: read_s(item, "message"),
                    data: read_opt_s(item, "data")
                        .and_then(|raw| serde_json::from_str(&raw).ok()),
                }
            })
            .collect();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }
}

fn execution_from_item(item: &Item) -> Execution {
    let status = match read_s(item, "status").as_str() {
        "pending" => ExecutionStatus::Pending,
        "running" => ExecutionStatus::Running,
        "completed" => ExecutionStatus::Completed,
        "cancelled" => ExecutionStatus::Cancelled,
        _ => ExecutionStatus::Failed,
    };
    Execution {
        id: read_s(item, "id"),
        flow_id: read_s(item, "flow_id"),
        account_id: read_s(item, "account_id"),
        status,
        start_time: read_n(item, "start_time").map(from_secs).unwrap_or_else(Utc::now),
        end_time: read_n(item, "end_time").map(from_secs),
        progress: read_f(item, "progress"),
        current_node_id: read_opt_s(item, "current_node_id"),
        results: serde_json::from_str(&read_s(item, "results")).unwrap_or_default(),
        error: read_opt_s(item, "error"),
        metadata: serde_json::from_str(&read_s(item, "metadata")).unwrap_or_default(),
    }
}

#[async_trait]
impl AccountStore for DynamoStorage {
    async fn save_account(&self, account: &Account) -> Result<(), StorageError> {
        // DynamoDB cannot enforce cross-item uniqueness; emulate the
        // unique indexes with GSI lookups before writing.
        if let Ok(existing) = self.get_account_by_username(&account.username).await {
            if existing.id != account.id {
                return Err(StorageError::SaveFailed(format!(
                    "duplicate username or token: {}",
                    account.username
                )));
            }
        }
        if let Ok(existing) = self.get_account_by_token(&account.api_token).await {
            if existing.id != account.id {
                return Err(StorageError::SaveFailed(format!(
                    "duplicate username or token: {}",
                    account.username
                )));
            }
        }

        let item: Item = HashMap::from([
            ("id".to_string(), s(&account.id)),
            ("username".to_string(), s(&account.username)),
            ("password_hash".to_string(), s(&account.password_hash)),
            ("api_token".to_string(), s(&account.api_token)),
            ("created_at".to_string(), n(to_secs(account.created_at))),
            ("updated_at".to_string(), n(to_secs(account.updated_at))),
        ]);
        self.put("accounts", item).await
    }

    async fn get_account(&self, account_id: &str) -> Result<Account, StorageError> {
        let item = self
            .get("accounts", HashMap::from([("id".to_string(), s(account_id))]))
            .await?
            .ok_or_else(|| StorageError::AccountNotFound(account_id.to_string()))?;
        Ok(account_from_item(&item))
    }

    async fn get_account_by_username(&self, username: &str) -> Result<Account, StorageError> {
        self.query_account_index("username-index", "username", username)
            .await?
            .ok_or_else(|| StorageError::AccountNotFound(username.to_string()))
    }

    async fn get_account_by_token(&self, api_token: &str) -> Result<Account, StorageError> {
        self.query_account_index("token-index", "api_token", api_token)
            .await?
            .ok_or_else(|| StorageError::AccountNotFound("token".to_string()))
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        let output = self
            .client
            .scan()
            .table_name(self.table("accounts"))
            .send()
            .await
            .map_err(backend_error)?;
        let mut accounts: Vec<Account> = output
            .items
            .unwrap_or_default()
            .iter()
            .map(account_from_item)
            .collect();
        accounts.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(accounts)
    }

    async fn delete_account(&self, account_id: &str) -> Result<(), StorageError> {
        self.get_account(account_id).await?;
        self.client
            .delete_item()
            .table_name(self.table("accounts"))
            .key("id", s(account_id))
            .send()
            .await
            .map_err(backend_error)?;
        Ok(())
    }
}

impl DynamoStorage {
    async fn query_account_index(
        &self,
        index: &str,
        attribute: &str,
        value: &str,
    ) -> Result<Option<Account>, StorageError> {
        let output = self
            .client
            .query()
            .table_name(self.table("accounts"))
            .index_name(index)
            .key_condition_expression("#k = :v")
            .expression_attribute_names("#k", attribute)
            .expression_attribute_values(":v", s(value))
            .limit(1)
            .send()
            .await
            .map_err(backend_error)?;
        Ok(output
            .items
            .unwrap_or_default()
            .first()
            .map(account_from_item))
    }
}

fn account_from_item(item: &Item) -> Account {
    Account {
        id: read_s(item, "id"),
        username: read_s(item, "username"),
        password_hash: read_s(item, "password_hash"),
        api_token: read_s(item, "api_token"),
        created_at: read_n(item, "created_at").map(from_secs).unwrap_or_else(Utc::now),
        updated_at: read_n(item, "updated_at").map(from_secs).unwrap_or_else(Utc::now),
    }
}

#[async_trait]
impl StorageProvider for DynamoStorage {
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
        self.ensure_table(
            "flows",
            ("account_id", ScalarAttributeType::S),
            Some(("flow_id", ScalarAttributeType::S)),
            vec![],
        )
        .await?;
        self.ensure_table(
            "flow_versions",
            ("flow_key", ScalarAttributeType::S),
            Some(("version", ScalarAttributeType::S)),
            vec![],
        )
        .await?;
        self.ensure_table(
            "secrets",
            ("account_id", ScalarAttributeType::S),
            Some(("key", ScalarAttributeType::S)),
            vec![],
        )
        .await?;
        self.ensure_table(
            "executions",
            ("id", ScalarAttributeType::S),
            None,
            vec![(
                "account-start-index",
                "account_id",
                ScalarAttributeType::S,
                Some(("start_time", ScalarAttributeType::N)),
            )],
        )
        .await?;
        self.ensure_table(
            "execution_logs",
            ("execution_id", ScalarAttributeType::S),
            Some(("ts", ScalarAttributeType::N)),
            vec![],
        )
        .await?;
        self.ensure_table(
            "accounts",
            ("id", ScalarAttributeType::S),
            None,
            vec![
                (
                    "username-index",
                    "username",
                    ScalarAttributeType::S,
                    None,
                ),
                ("token-index", "api_token", ScalarAttributeType::S, None),
            ],
        )
        .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
