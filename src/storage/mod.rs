//! # Storage Abstraction
//!
//! One persistence contract, three interchangeable backends:
//!
//! - Memory storage (always available; tests and the default runtime)
//! - Relational storage via SeaORM (feature: `storage-database`)
//! - DynamoDB wide-column storage (feature: `storage-dynamodb`)
//!
//! A [`StorageProvider`] bundles four sub-stores — flows, secrets,
//! executions, accounts — plus `initialize`/`close`. Every backend
//! satisfies the same semantic contract; the conformance suite in
//! `tests/` runs unchanged against each of them.

use crate::model::{
    Account, Execution, ExecutionLogEntry, FlowMetadata, FlowSearchFilter, FlowVersion,
    SecretRecord,
};
use async_trait::async_trait;

// ============================================================================
// STORAGE TRAITS
// ============================================================================

/// Errors shared by every backend. The four not-found kinds are
/// distinguishable so callers can map them to API responses; uniqueness
/// violations surface as save failures with a distinguishing message.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("flow not found: {0}")]
    FlowNotFound(String),
    #[error("flow version not found: {flow_id} @ {version}")]
    VersionNotFound { flow_id: String, version: String },
    #[error("secret not found: {0}")]
    SecretNotFound(String),
    #[error("execution not found: {0}")]
    ExecutionNotFound(String),
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("save failed: {0}")]
    SaveFailed(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Flows and their immutable version history.
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Upsert the current definition. Derives searchable metadata from the
    /// payload; a payload that fails to parse still saves, with empty
    /// metadata fields.
    async fn save_flow(
        &self,
        account_id: &str,
        flow_id: &str,
        definition: &[u8],
    ) -> Result<(), StorageError>;

    async fn get_flow(&self, account_id: &str, flow_id: &str) -> Result<Vec<u8>, StorageError>;

    async fn get_flow_metadata(
        &self,
        account_id: &str,
        flow_id: &str,
    ) -> Result<FlowMetadata, StorageError>;

    /// Delete the flow and every version under it. Backends without an
    /// atomic cascade issue per-version deletes and must not leave
    /// orphaned versions behind on success.
    async fn delete_flow(&self, account_id: &str, flow_id: &str) -> Result<(), StorageError>;

    async fn list_flows(&self, account_id: &str) -> Result<Vec<FlowMetadata>, StorageError>;

    /// Versions are append-only; saving an existing (flow, version) pair
    /// is a save failure.
    async fn save_flow_version(&self, version: &FlowVersion) -> Result<(), StorageError>;

    async fn get_flow_version(
        &self,
        account_id: &str,
        flow_id: &str,
        version: &str,
    ) -> Result<FlowVersion, StorageError>;

    async fn list_flow_versions(
        &self,
        account_id: &str,
        flow_id: &str,
    ) -> Result<Vec<FlowVersion>, StorageError>;

    /// Metadata search. Implementations may push filters down and
    /// post-filter the remainder; semantics follow
    /// [`FlowSearchFilter::matches`].
    async fn search_flows(
        &self,
        account_id: &str,
        filter: &FlowSearchFilter,
    ) -> Result<Vec<FlowMetadata>, StorageError>;
}

/// Encrypted per-account secrets. Values arriving here are already
/// ciphertext; the store never sees plaintext.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Upsert. An existing (account, key) pair keeps its original
    /// `created_at`; `updated_at` becomes now.
    async fn save_secret(&self, record: &SecretRecord) -> Result<(), StorageError>;

    async fn get_secret(&self, account_id: &str, key: &str) -> Result<SecretRecord, StorageError>;

    async fn delete_secret(&self, account_id: &str, key: &str) -> Result<(), StorageError>;

    async fn list_secrets(&self, account_id: &str) -> Result<Vec<SecretRecord>, StorageError>;
}

/// Execution records and their append-only log streams.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn save_execution(&self, execution: &Execution) -> Result<(), StorageError>;

    async fn get_execution(&self, execution_id: &str) -> Result<Execution, StorageError>;

    /// Account-scoped listing, most recent start time first. `limit` of 0
    /// means no limit.
    async fn list_executions(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<Execution>, StorageError>;

    async fn append_log(&self, entry: &ExecutionLogEntry) -> Result<(), StorageError>;

    /// Log entries in timestamp order.
    async fn get_logs(&self, execution_id: &str)
    -> Result<Vec<ExecutionLogEntry>, StorageError>;
}

/// Accounts, with unique username and API token lookups.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn save_account(&self, account: &Account) -> Result<(), StorageError>;

    async fn get_account(&self, account_id: &str) -> Result<Account, StorageError>;

    async fn get_account_by_username(&self, username: &str) -> Result<Account, StorageError>;

    async fn get_account_by_token(&self, api_token: &str) -> Result<Account, StorageError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, StorageError>;

    async fn delete_account(&self, account_id: &str) -> Result<(), StorageError>;
}

/// The single persistence contract the rest of the service programs
/// against.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    fn flows(&self) -> &dyn FlowStore;
    fn secrets(&self) -> &dyn SecretStore;
    fn executions(&self) -> &dyn ExecutionStore;
    fn accounts(&self) -> &dyn AccountStore;

    /// Prepare the backend (create tables, verify connectivity).
    async fn initialize(&self) -> Result<(), StorageError>;

    /// Release connections. Idempotent.
    async fn close(&self) -> Result<(), StorageError>;
}

// ============================================================================
// SHARED HELPERS
// ============================================================================

/// Pull searchable metadata out of a flow definition. Parse failure is not
/// an error: the flow saves with the derived fields left empty.
pub(crate) fn extract_definition_metadata(definition: &[u8]) -> FlowMetadata {
    let mut meta = FlowMetadata::default();
    let Ok(doc) = serde_yaml::from_slice::<serde_yaml::Value>(definition) else {
        return meta;
    };
    let Some(block) = doc.get("metadata") else {
        return meta;
    };

    let text = |field: &str| {
        block
            .get(field)
            .and_then(serde_yaml::Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    meta.name = text("name");
    meta.description = text("description");
    meta.version = text("version");
    meta.category = text("category");
    meta.status = text("status");
    if let Some(tags) = block.get("tags").and_then(serde_yaml::Value::as_sequence) {
        meta.tags = tags
            .iter()
            .filter_map(serde_yaml::Value::as_str)
            .map(String::from)
            .collect();
    }
    meta
}

// ============================================================================
// STORAGE IMPLEMENTATIONS (feature-gated)
// ============================================================================

// Memory storage - always available
mod memory;
pub use memory::MemoryStorage;

// Relational storage via SeaORM
#[cfg(feature = "storage-database")]
pub mod database;
#[cfg(feature = "storage-database")]
pub use database::DatabaseStorage;

// DynamoDB wide-column storage
#[cfg(feature = "storage-dynamodb")]
mod dynamo;
#[cfg(feature = "storage-dynamodb")]
pub use dynamo::DynamoStorage;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_definition_metadata() {
        let definition = br#"
metadata:
  name: enrich-users
  description: Enrich incoming users
  version: "2"
  tags: [etl, nightly]
  category: ingest
nodes:
  start:
    type: log
"#;
        let meta = extract_definition_metadata(definition);
        assert_eq!(meta.name, "enrich-users");
        assert_eq!(meta.description, "Enrich incoming users");
        assert_eq!(meta.version, "2");
        assert_eq!(meta.tags, vec!["etl", "nightly"]);
        assert_eq!(meta.category, "ingest");
    }

    #[test]
    fn test_extract_metadata_tolerates_garbage() {
        let meta = extract_definition_metadata(b"\x00\x01 not yaml: [");
        assert!(meta.name.is_empty());
        assert!(meta.version.is_empty());

        let meta = extract_definition_metadata(b"nodes: {}");
        assert!(meta.name.is_empty());
    }
}
