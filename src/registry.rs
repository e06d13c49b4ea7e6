//! # Flow Registry
//!
//! Flow CRUD and versioning on top of the storage contract. Every save
//! writes the current definition and appends an immutable version entry,
//! so a saved flow always has at least one version. Deleting a flow
//! removes its whole version history.

use crate::model::{FlowMetadata, FlowSearchFilter, FlowVersion};
use crate::storage::{StorageError, StorageProvider};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// Flow catalogue for one service instance.
pub struct FlowRegistry {
    storage: Arc<dyn StorageProvider>,
}

impl FlowRegistry {
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self { storage }
    }

    /// Save a flow definition and record a version.
    ///
    /// The version token is caller-supplied or synthesized from the
    /// current time at nanosecond resolution, which keeps tokens
    /// monotone across successive saves of the same flow.
    pub async fn save_flow(
        &self,
        account_id: &str,
        flow_id: &str,
        definition: &[u8],
        version: Option<String>,
        created_by: Option<String>,
    ) -> Result<String, StorageError> {
        self.storage
            .flows()
            .save_flow(account_id, flow_id, definition)
            .await?;

        let version = version.unwrap_or_else(synthesize_version);
        self.storage
            .flows()
            .save_flow_version(&FlowVersion {
                account_id: account_id.to_string(),
                flow_id: flow_id.to_string(),
                version: version.clone(),
                definition: definition.to_vec(),
                description: String::new(),
                created_at: Utc::now(),
                created_by,
            })
            .await?;

        info!(account_id, flow_id, %version, "flow saved");
        Ok(version)
    }

    /// Create a flow under a fresh id.
    pub async fn create_flow(
        &self,
        account_id: &str,
        definition: &[u8],
    ) -> Result<String, StorageError> {
        let flow_id = uuid::Uuid::new_v4().to_string();
        self.save_flow(account_id, &flow_id, definition, None, None)
            .await?;
        Ok(flow_id)
    }

    /// Current definition bytes.
    pub async fn get_flow(
        &self,
        account_id: &str,
        flow_id: &str,
    ) -> Result<Vec<u8>, StorageError> {
        self.storage.flows().get_flow(account_id, flow_id).await
    }

    pub async fn get_metadata(
        &self,
        account_id: &str,
        flow_id: &str,
    ) -> Result<FlowMetadata, StorageError> {
        self.storage
            .flows()
            .get_flow_metadata(account_id, flow_id)
            .await
    }

    /// Delete the flow and all versions.
    pub async fn delete_flow(&self, account_id: &str, flow_id: &str) -> Result<(), StorageError> {
        self.storage.flows().delete_flow(account_id, flow_id).await?;
        info!(account_id, flow_id, "flow deleted");
        Ok(())
    }

    pub async fn list_flows(&self, account_id: &str) -> Result<Vec<FlowMetadata>, StorageError> {
        self.storage.flows().list_flows(account_id).await
    }

    pub async fn list_versions(
        &self,
        account_id: &str,
        flow_id: &str,
    ) -> Result<Vec<FlowVersion>, StorageError> {
        self.storage
            .flows()
            .list_flow_versions(account_id, flow_id)
            .await
    }

    pub async fn get_version(
        &self,
        account_id: &str,
        flow_id: &str,
        version: &str,
    ) -> Result<FlowVersion, StorageError> {
        self.storage
            .flows()
            .get_flow_version(account_id, flow_id, version)
            .await
    }

    pub async fn search(
        &self,
        account_id: &str,
        filter: &FlowSearchFilter,
    ) -> Result<Vec<FlowMetadata>, StorageError> {
        self.storage.flows().search_flows(account_id, filter).await
    }
}

fn synthesize_version() -> String {
    let nanos = Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp_micros().saturating_mul(1000));
    format!("v{nanos}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn registry() -> FlowRegistry {
        FlowRegistry::new(Arc::new(MemoryStorage::new()))
    }

    const DEFINITION_V1: &[u8] = b"metadata:\n  name: demo\nnodes:\n  start:\n    type: log\n";
    const DEFINITION_V2: &[u8] = b"metadata:\n  name: demo2\nnodes:\n  start:\n    type: log\n";

    #[tokio::test]
    async fn test_create_then_update_keeps_both_versions() {
        let registry = registry();
        let flow_id = registry.create_flow("a1", DEFINITION_V1).await.unwrap();

        registry
            .save_flow("a1", &flow_id, DEFINITION_V2, None, None)
            .await
            .unwrap();

        let versions = registry.list_versions("a1", &flow_id).await.unwrap();
        assert_eq!(versions.len(), 2);

        // Current definition is the latest; the first version keeps the
        // original bytes.
        assert_eq!(
            registry.get_flow("a1", &flow_id).await.unwrap(),
            DEFINITION_V2
        );
        let original = registry
            .get_version("a1", &flow_id, &versions[0].version)
            .await
            .unwrap();
        assert_eq!(original.definition, DEFINITION_V1);
    }

    #[tokio::test]
    async fn test_synthesized_versions_are_monotone() {
        let registry = registry();
        let flow_id = registry.create_flow("a1", DEFINITION_V1).await.unwrap();
        registry
            .save_flow("a1", &flow_id, DEFINITION_V1, None, None)
            .await
            .unwrap();
        registry
            .save_flow("a1", &flow_id, DEFINITION_V1, None, None)
            .await
            .unwrap();

        let versions = registry.list_versions("a1", &flow_id).await.unwrap();
        let tokens: Vec<&String> = versions.iter().map(|v| &v.version).collect();
        let mut sorted = tokens.clone();
        sorted.sort();
        assert_eq!(tokens, sorted);
        assert_eq!(versions.len(), 3);
    }

    #[tokio::test]
    async fn test_caller_supplied_version_token() {
        let registry = registry();
        let flow_id = registry.create_flow("a1", DEFINITION_V1).await.unwrap();
        registry
            .save_flow(
                "a1",
                &flow_id,
                DEFINITION_V2,
                Some("release-2".to_string()),
                Some("alice".to_string()),
            )
            .await
            .unwrap();

        let version = registry
            .get_version("a1", &flow_id, "release-2")
            .await
            .unwrap();
        assert_eq!(version.created_by.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_delete_removes_versions() {
        let registry = registry();
        let flow_id = registry.create_flow("a1", DEFINITION_V1).await.unwrap();
        registry.delete_flow("a1", &flow_id).await.unwrap();

        assert!(registry.get_flow("a1", &flow_id).await.is_err());
        assert!(
            registry
                .list_versions("a1", &flow_id)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_metadata_extracted_on_save() {
        let registry = registry();
        let flow_id = registry.create_flow("a1", DEFINITION_V1).await.unwrap();
        let meta = registry.get_metadata("a1", &flow_id).await.unwrap();
        assert_eq!(meta.name, "demo");
    }
}
