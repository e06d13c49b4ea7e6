//! In-memory storage backend.
//!
//! Plain maps guarded by per-store reader-writer locks. No durability;
//! this is the default runtime backend when no external store is
//! configured, and the workhorse of the test suites. Locks are never held
//! across await points.

use super::{
    AccountStore, ExecutionStore, FlowStore, SecretStore, StorageError, StorageProvider,
    extract_definition_metadata,
};
use crate::model::{
    Account, Execution, ExecutionLogEntry, FlowMetadata, FlowSearchFilter, FlowVersion,
    SecretRecord,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

type Key = (String, String); // (account id, entity id)

#[derive(Debug, Clone)]
struct FlowEntry {
    definition: Vec<u8>,
    metadata: FlowMetadata,
}

/// Map-backed implementation of the full storage contract.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    flows: RwLock<HashMap<Key, FlowEntry>>,
    versions: RwLock<HashMap<Key, Vec<FlowVersion>>>,
    secrets: RwLock<HashMap<Key, SecretRecord>>,
    executions: RwLock<HashMap<String, Execution>>,
    logs: RwLock<HashMap<String, Vec<ExecutionLogEntry>>>,
    accounts: RwLock<HashMap<String, Account>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned(_: impl std::fmt::Debug) -> StorageError {
    StorageError::Backend("storage lock poisoned".to_string())
}

#[async_trait]
impl FlowStore for MemoryStorage {
    async fn save_flow(
        &self,
        account_id: &str,
        flow_id: &str,
        definition: &[u8],
    ) -> Result<(), StorageError> {
        let now = Utc::now();
        let mut metadata = extract_definition_metadata(definition);
        metadata.id = flow_id.to_string();
        metadata.account_id = account_id.to_string();
        metadata.updated_at = Some(now);

        let mut flows = self.flows.write().map_err(poisoned)?;
        let key = (account_id.to_string(), flow_id.to_string());
        metadata.created_at = flows
            .get(&key)
            .and_then(|existing| existing.metadata.created_at)
            .or(Some(now));
        flows.insert(
            key,
            FlowEntry {
                definition: definition.to_vec(),
                metadata,
            },
        );
        Ok(())
    }

    async fn get_flow(&self, account_id: &str, flow_id: &str) -> Result<Vec<u8>, StorageError> {
        let flows = self.flows.read().map_err(poisoned)?;
        flows
            .get(&(account_id.to_string(), flow_id.to_string()))
            .map(|entry| entry.definition.clone())
            .ok_or_else(|| StorageError::FlowNotFound(flow_id.to_string()))
    }

    async fn get_flow_metadata(
        &self,
        account_id: &str,
        flow_id: &str,
    ) -> Result<FlowMetadata, StorageError> {
        let flows = self.flows.read().map_err(poisoned)?;
        flows
            .get(&(account_id.to_string(), flow_id.to_string()))
            .map(|entry| entry.metadata.clone())
            .ok_or_else(|| StorageError::FlowNotFound(flow_id.to_string()))
    }

    async fn delete_flow(&self, account_id: &str, flow_id: &str) -> Result<(), StorageError> {
        let key = (account_id.to_string(), flow_id.to_string());
        let mut flows = self.flows.write().map_err(poisoned)?;
        if flows.remove(&key).is_none() {
            return Err(StorageError::FlowNotFound(flow_id.to_string()));
        }
        // Versions go with the flow.
        self.versions.write().map_err(poisoned)?.remove(&key);
        Ok(())
    }

    async fn list_flows(&self, account_id: &str) -> Result<Vec<FlowMetadata>, StorageError> {
        let flows = self.flows.read().map_err(poisoned)?;
        let mut out: Vec<FlowMetadata> = flows
            .iter()
            .filter(|((acct, _), _)| acct == account_id)
            .map(|(_, entry)| entry.metadata.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn save_flow_version(&self, version: &FlowVersion) -> Result<(), StorageError> {
        let key = (version.account_id.clone(), version.flow_id.clone());
        let mut versions = self.versions.write().map_err(poisoned)?;
        let entries = versions.entry(key).or_default();
        if entries.iter().any(|v| v.version == version.version) {
            return Err(StorageError::SaveFailed(format!(
                "duplicate version {} for flow {}",
                version.version, version.flow_id
            )));
        }
        entries.push(version.clone());
        Ok(())
    }

    async fn get_flow_version(
        &self,
        account_id: &str,
        flow_id: &str,
        version: &str,
    ) -> Result<FlowVersion, StorageError> {
        let versions = self.versions.read().map_err(poisoned)?;
        versions
            .get(&(account_id.to_string(), flow_id.to_string()))
            .and_then(|entries| entries.iter().find(|v| v.version == version))
            .cloned()
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
        let versions = self.versions.read().map_err(poisoned)?;
        let mut out = versions
            .get(&(account_id.to_string(), flow_id.to_string()))
            .cloned()
            .unwrap_or_default();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn search_flows(
        &self,
        account_id: &str,
        filter: &FlowSearchFilter,
    ) -> Result<Vec<FlowMetadata>, StorageError> {
        let all = self.list_flows(account_id).await?;
        let matched: Vec<FlowMetadata> =
            all.into_iter().filter(|meta| filter.matches(meta)).collect();
        Ok(filter.paginate(matched))
    }
}

#[async_trait]
impl SecretStore for MemoryStorage {
    async fn save_secret(&self, record: &SecretRecord) -> Result<(), StorageError> {
        let key = (record.account_id.clone(), record.key.clone());
        let mut secrets = self.secrets.write().map_err(poisoned)?;
        let mut stored = record.clone();
        if let Some(existing) = secrets.get(&key) {
            stored.created_at = existing.created_at;
        }
        stored.updated_at = Utc::now();
        secrets.insert(key, stored);
        Ok(())
    }

    async fn get_secret(&self, account_id: &str, key: &str) -> Result<SecretRecord, StorageError> {
        let secrets = self.secrets.read().map_err(poisoned)?;
        secrets
            .get(&(account_id.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::SecretNotFound(key.to_string()))
    }

    async fn delete_secret(&self, account_id: &str, key: &str) -> Result<(), StorageError> {
        let mut secrets = self.secrets.write().map_err(poisoned)?;
        secrets
            .remove(&(account_id.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or_else(|| StorageError::SecretNotFound(key.to_string()))
    }

    async fn list_secrets(&self, account_id: &str) -> Result<Vec<SecretRecord>, StorageError> {
        let secrets = self.secrets.read().map_err(poisoned)?;
        let mut out: Vec<SecretRecord> = secrets
            .iter()
            .filter(|((acct, _), _)| acct == account_id)
            .map(|(_, record)| record.clone())
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}

#[async_trait]
impl ExecutionStore for MemoryStorage {
    async fn save_execution(&self, execution: &Execution) -> Result<(), StorageError> {
        let mut executions = self.executions.write().map_err(poisoned)?;
        executions.insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Execution, StorageError> {
        let executions = self.executions.read().map_err(poisoned)?;
        executions
            .get(execution_id)
            .cloned()
            .ok_or_else(|| StorageError::ExecutionNotFound(execution_id.to_string()))
    }

    async fn list_executions(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<Execution>, StorageError> {
        let executions = self.executions.read().map_err(poisoned)?;
        let mut out: Vec<Execution> = executions
            .values()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        if limit > 0 {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn append_log(&self, entry: &ExecutionLogEntry) -> Result<(), StorageError> {
        let mut logs = self.logs.write().map_err(poisoned)?;
        logs.entry(entry.execution_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn get_logs(
        &self,
        execution_id: &str,
    ) -> Result<Vec<ExecutionLogEntry>, StorageError> {
        let logs = self.logs.read().map_err(poisoned)?;
        let mut out = logs.get(execution_id).cloned().unwrap_or_default();
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(out)
    }
}

#[async_trait]
impl AccountStore for MemoryStorage {
    async fn save_account(&self, account: &Account) -> Result<(), StorageError> {
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        let conflict = accounts.values().any(|existing| {
            existing.id != account.id
                && (existing.username == account.username
                    || existing.api_token == account.api_token)
        });
        if conflict {
            return Err(StorageError::SaveFailed(format!(
                "duplicate username or token: {}",
                account.username
            )));
        }
        accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn get_account(&self, account_id: &str) -> Result<Account, StorageError> {
        let accounts = self.accounts.read().map_err(poisoned)?;
        accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| StorageError::AccountNotFound(account_id.to_string()))
    }

    async fn get_account_by_username(&self, username: &str) -> Result<Account, StorageError> {
        let accounts = self.accounts.read().map_err(poisoned)?;
        accounts
            .values()
            .find(|a| a.username == username)
            .cloned()
            .ok_or_else(|| StorageError::AccountNotFound(username.to_string()))
    }

    async fn get_account_by_token(&self, api_token: &str) -> Result<Account, StorageError> {
        let accounts = self.accounts.read().map_err(poisoned)?;
        accounts
            .values()
            .find(|a| a.api_token == api_token)
            .cloned()
            .ok_or_else(|| StorageError::AccountNotFound("token".to_string()))
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        let accounts = self.accounts.read().map_err(poisoned)?;
        let mut out: Vec<Account> = accounts.values().cloned().collect();
        out.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(out)
    }

    async fn delete_account(&self, account_id: &str) -> Result<(), StorageError> {
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        accounts
            .remove(account_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::AccountNotFound(account_id.to_string()))
    }
}

#[async_trait]
impl StorageProvider for MemoryStorage {
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
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
