//! # Node Type Registry
//!
//! Maps the `type` names that appear in flow documents to node factories.
//! Registration happens once at process start (a single entry point keeps
//! the set of runnable node types auditable); after that the registry is
//! shared immutably, so lookups during graph build take no lock.

use super::{Node, NodeError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a node from its declared parameter map.
pub type NodeFactory = Arc<dyn Fn(&Value) -> Result<Box<dyn Node>, NodeError> + Send + Sync>;

/// Errors from registry registration.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("node type already registered: {0}")]
    DuplicateNodeType(String),
}

/// Write-once map from node-type name to factory.
#[derive(Default)]
pub struct NodeRegistry {
    factories: HashMap<String, NodeFactory>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a type name. Duplicate names are rejected
    /// so a later registration cannot silently shadow an earlier one.
    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&Value) -> Result<Box<dyn Node>, NodeError> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        if self.factories.contains_key(&type_name) {
            return Err(RegistryError::DuplicateNodeType(type_name));
        }
        self.factories.insert(type_name, Arc::new(factory));
        Ok(())
    }

    /// Instantiate a node of the given type from its raw parameter map.
    pub fn build(&self, type_name: &str, params: &Value) -> Result<Box<dyn Node>, NodeError> {
        let factory = self
            .factories
            .get(type_name)
            .ok_or_else(|| NodeError::InvalidParameter {
                name: "type".to_string(),
                reason: format!("unknown node type: {type_name}"),
            })?;
        factory(params)
    }

    /// Whether a type name is registered.
    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered type names, for diagnostics.
    pub fn type_names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Freeze the registry for shared, lock-free reads.
    pub fn into_shared(self) -> Arc<NodeRegistry> {
        Arc::new(self)
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::shared::SharedState;
    use async_trait::async_trait;

    struct NoopNode;

    #[async_trait]
    impl Node for NoopNode {
        fn set_params(&mut self, _params: Value) {}

        async fn exec(&mut self, _prepared: Value) -> Result<Value, NodeError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_register_and_build() {
        let mut registry = NodeRegistry::new();
        registry
            .register("noop", |_params| Ok(Box::new(NoopNode) as Box<dyn Node>))
            .unwrap();

        assert!(registry.contains("noop"));
        assert!(registry.build("noop", &Value::Null).is_ok());
    }

    #[test]
    fn test_unknown_type_fails() {
        let registry = NodeRegistry::new();
        let err = registry.build("nope", &Value::Null).unwrap_err();
        assert!(err.to_string().contains("unknown node type"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = NodeRegistry::new();
        registry
            .register("noop", |_params| Ok(Box::new(NoopNode) as Box<dyn Node>))
            .unwrap();
        let err = registry
            .register("noop", |_params| Ok(Box::new(NoopNode) as Box<dyn Node>))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateNodeType(_)));
    }

    #[tokio::test]
    async fn test_built_node_runs_phases() {
        let mut registry = NodeRegistry::new();
        registry
            .register("noop", |_params| Ok(Box::new(NoopNode) as Box<dyn Node>))
            .unwrap();

        let mut node = registry.build("noop", &Value::Null).unwrap();
        let mut shared = SharedState::new();
        let prepared = node.prep(&shared).await.unwrap();
        let result = node.exec(prepared.clone()).await.unwrap();
        let action = node.post(&mut shared, prepared, result).await.unwrap();
        assert_eq!(action, Action::default_action());
    }
}
