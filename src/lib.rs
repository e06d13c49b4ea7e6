//! # Flowrunner
//!
//! A multi-tenant workflow orchestration service. Flows are declarative
//! YAML documents — directed graphs of nodes with action-labeled edges —
//! loaded on demand and executed over HTTP.
//!
//! Flowrunner models a flow as a **Graph + Shared State**:
//! - **Node**: a unit of work with three phases (`prep`/`exec`/`post`)
//!   and intrinsic retry policy
//! - **Flow**: nodes connected through **Actions** (labeled edges)
//! - **Shared state**: the flow-scoped map nodes communicate through
//!
//! ## Architecture
//!
//! ### Engine
//! - `node`: the plugin contract, the type registry, and built-in nodes
//! - `flow`: YAML loading, validation, and graph building
//! - `runtime`: execution scheduling, retries, cancellation, logging
//! - `expr`: the `${…}` expression/template subsystem resolving node
//!   parameters against secrets, prior results, and shared state
//!
//! ### Services
//! - `vault`: AES-256-GCM encrypted per-account secrets with key
//!   rotation and a structured-secret extension
//! - `account`: credential hashing, API tokens, JWT validation
//! - `registry`: flow CRUD, versioning, and metadata search
//! - `webhook`: signed event delivery on execution milestones
//!
//! ### Persistence
//! - `storage`: one contract, three backends —
//!   memory (always available), SeaORM relational
//!   (feature: `storage-database`), DynamoDB wide-column
//!   (feature: `storage-dynamodb`)
//!
//! ### Surface
//! - `server`: the axum REST API
//! - `config`: file + environment configuration with first-run key
//!   generation

// ============================================================================
// MODULES
// ============================================================================

pub mod account;
pub mod action;
pub mod config;
pub mod expr;
pub mod flow;
pub mod model;
pub mod node;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod shared;
pub mod storage;
pub mod vault;
pub mod webhook;

// ============================================================================
// CORE RE-EXPORTS
// ============================================================================

pub use action::Action;
pub use shared::SharedState;

pub use node::registry::NodeRegistry;
pub use node::{Node, NodeError, RetryPolicy};

pub use flow::{FlowGraph, LoaderError, build_graph};
pub use runtime::{FlowRuntime, RuntimeError};

pub use expr::{EvalContext, Evaluator, ExprError};

pub use vault::{SecretVault, VaultError};

pub use account::{AccountError, AccountService};
pub use registry::FlowRegistry;

pub use storage::{MemoryStorage, StorageError, StorageProvider};

#[cfg(feature = "storage-database")]
pub use storage::DatabaseStorage;

#[cfg(feature = "storage-dynamodb")]
pub use storage::DynamoStorage;

/// Commonly used external types.
pub use serde_json::Value as JsonValue;

/// Convenient re-exports for common types and traits.
pub mod prelude {
    pub use crate::account::AccountService;
    pub use crate::action::Action;
    pub use crate::expr::{EvalContext, Evaluator};
    pub use crate::flow::{FlowGraph, build_graph};
    pub use crate::model::{Execution, ExecutionStatus};
    pub use crate::node::registry::NodeRegistry;
    pub use crate::node::{Node, NodeError, RetryPolicy};
    pub use crate::registry::FlowRegistry;
    pub use crate::runtime::FlowRuntime;
    pub use crate::shared::SharedState;
    pub use crate::storage::{MemoryStorage, StorageProvider};
    pub use crate::vault::SecretVault;

    #[cfg(feature = "builtin-nodes")]
    pub use crate::node::builtin::register_builtin_nodes;

    #[cfg(feature = "storage-database")]
    pub use crate::storage::DatabaseStorage;

    #[cfg(feature = "storage-dynamodb")]
    pub use crate::storage::DynamoStorage;

    pub use serde_json::Value as JsonValue;
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Crate-level error aggregating the subsystem errors, for callers that
/// embed the engine as a library.
#[derive(Debug, thiserror::Error)]
pub enum FlowrunnerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// A storage backend selected in configuration was not compiled in.
    #[error("feature not enabled: {0}. Rebuild with the matching storage feature flag.")]
    FeatureNotEnabled(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_not_enabled_message() {
        let error = FlowrunnerError::FeatureNotEnabled("storage-dynamodb".to_string());
        assert!(error.to_string().contains("storage-dynamodb"));
    }

    #[test]
    fn test_error_conversion() {
        let storage = StorageError::FlowNotFound("f".to_string());
        let error: FlowrunnerError = storage.into();
        assert!(matches!(error, FlowrunnerError::Storage(_)));
    }
}
