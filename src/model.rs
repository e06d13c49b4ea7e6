//! # Domain Records
//!
//! The entities persisted through the storage contract: accounts, secrets,
//! flows and their versions, executions and their log streams. Field names
//! here are the canonical wire names; every storage backend maps them onto
//! its own schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A tenant of the service. Owns flows and secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    /// bcrypt hash; never serialized out through the API layer.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Hex of 32 cryptographically random bytes; unique across accounts.
    #[serde(skip_serializing)]
    pub api_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored secret. `value` is ciphertext (hex `nonce ‖ ct ‖ tag`) or, for
/// structured secrets, the JSON envelope holding that ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRecord {
    pub account_id: String,
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SecretRecord {
    /// Copy of this record with the stored value blanked, for listings that
    /// must not expose ciphertext.
    pub fn blanked(&self) -> Self {
        Self {
            value: String::new(),
            ..self.clone()
        }
    }
}

/// Metadata derived from a saved flow definition.
///
/// `name`, `description` and `version` are extracted from the definition's
/// `metadata` block on save; extraction failure leaves them empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowMetadata {
    pub id: String,
    pub account_id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// An immutable snapshot of a flow definition.
///
/// Versions are never mutated after write; deleting the flow deletes all of
/// its versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowVersion {
    pub account_id: String,
    pub flow_id: String,
    pub version: String,
    #[serde(with = "serde_bytes_base64")]
    pub definition: Vec<u8>,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

/// Terminal and non-terminal states of one flow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Whether no further transitions can occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One run of a flow: status, progress, accumulated results, error text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub flow_id: String,
    pub account_id: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// 0.0–1.0, best-effort for branching graphs.
    pub progress: f64,
    pub current_node_id: Option<String>,
    /// Per-node results keyed by node id.
    pub results: Map<String, Value>,
    /// Populated iff `status == Failed`.
    pub error: Option<String>,
    /// Carries at least the owning account id.
    pub metadata: Map<String, Value>,
}

impl Execution {
    /// Fresh `pending` execution for a flow.
    pub fn new(flow_id: impl Into<String>, account_id: impl Into<String>) -> Self {
        let account_id = account_id.into();
        let mut metadata = Map::new();
        metadata.insert("account_id".to_string(), Value::String(account_id.clone()));
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            flow_id: flow_id.into(),
            account_id,
            status: ExecutionStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            progress: 0.0,
            current_node_id: None,
            results: Map::new(),
            error: None,
            metadata,
        }
    }
}

/// Severity of an execution log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Append-only log entry attached to an execution, ordered by timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub execution_id: String,
    pub timestamp: DateTime<Utc>,
    pub node_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ExecutionLogEntry {
    pub fn new(
        execution_id: impl Into<String>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            timestamp: Utc::now(),
            node_id: None,
            level,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Filters for flow metadata search. Tag matching is OR-any: a flow matches
/// when it carries at least one of the requested tags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowSearchFilter {
    pub name_contains: Option<String>,
    pub description_contains: Option<String>,
    pub tags_any: Vec<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
    /// 1-based page number; 0 means first page.
    pub page: usize,
    /// 0 means no paging.
    pub page_size: usize,
}

impl FlowSearchFilter {
    /// Whether the given metadata passes every populated filter.
    pub fn matches(&self, meta: &FlowMetadata) -> bool {
        if let Some(needle) = &self.name_contains {
            if !meta.name.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        if let Some(needle) = &self.description_contains {
            if !meta
                .description
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        if !self.tags_any.is_empty() && !self.tags_any.iter().any(|t| meta.tags.contains(t)) {
            return false;
        }
        if let Some(category) = &self.category {
            if &meta.category != category {
                return false;
            }
        }
        if let Some(status) = &self.status {
            if &meta.status != status {
                return false;
            }
        }
        if let (Some(after), Some(created)) = (self.created_after, meta.created_at) {
            if created < after {
                return false;
            }
        }
        if let (Some(before), Some(created)) = (self.created_before, meta.created_at) {
            if created > before {
                return false;
            }
        }
        if let (Some(after), Some(updated)) = (self.updated_after, meta.updated_at) {
            if updated < after {
                return false;
            }
        }
        if let (Some(before), Some(updated)) = (self.updated_before, meta.updated_at) {
            if updated > before {
                return false;
            }
        }
        true
    }

    /// Apply paging to an already-filtered result set.
    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        if self.page_size == 0 {
            return items;
        }
        let page = self.page.max(1);
        items
            .into_iter()
            .skip((page - 1) * self.page_size)
            .take(self.page_size)
            .collect()
    }
}

/// Flow definitions travel as raw bytes but serialize as base64 in JSON.
mod serde_bytes_base64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execution_starts_pending_with_account_metadata() {
        let execution = Execution::new("flow-1", "acct-1");
        assert_eq!(execution.status, ExecutionStatus::Pending);
        assert!(execution.end_time.is_none());
        assert_eq!(execution.progress, 0.0);
        assert_eq!(
            execution.metadata.get("account_id"),
            Some(&json!("acct-1"))
        );
    }

    #[test]
    fn test_status_terminality() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::Running).unwrap(),
            "\"running\""
        );
    }

    #[test]
    fn test_search_filter_tags_are_or_any() {
        let meta = FlowMetadata {
            tags: vec!["etl".to_string(), "nightly".to_string()],
            ..FlowMetadata::default()
        };

        let mut filter = FlowSearchFilter {
            tags_any: vec!["nightly".to_string(), "absent".to_string()],
            ..FlowSearchFilter::default()
        };
        assert!(filter.matches(&meta));

        filter.tags_any = vec!["absent".to_string()];
        assert!(!filter.matches(&meta));
    }

    #[test]
    fn test_search_filter_name_is_case_insensitive() {
        let meta = FlowMetadata {
            name: "Daily Report".to_string(),
            ..FlowMetadata::default()
        };
        let filter = FlowSearchFilter {
            name_contains: Some("daily".to_string()),
            ..FlowSearchFilter::default()
        };
        assert!(filter.matches(&meta));
    }

    #[test]
    fn test_pagination() {
        let filter = FlowSearchFilter {
            page: 2,
            page_size: 2,
            ..FlowSearchFilter::default()
        };
        let paged = filter.paginate(vec![1, 2, 3, 4, 5]);
        assert_eq!(paged, vec![3, 4]);
    }
}
