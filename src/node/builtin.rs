//! Built-in node implementations
//!
//! A small set of general-purpose nodes, enough to express useful flows and
//! to exercise every engine path: logging, shared-state writes, delays,
//! branching, and expression-driven transforms. Heavier integrations (HTTP,
//! mail, LLM calls) ship as external plugins registered alongside these.

use super::registry::NodeRegistry;
use super::{Node, NodeError};
use crate::action::Action;
use crate::shared::SharedState;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

/// Register every built-in node type. Call once while assembling the
/// process-wide registry.
pub fn register_builtin_nodes(registry: &mut NodeRegistry) {
    // Registration errors here can only be duplicate names within this
    // function, which would be a programming error caught by tests.
    let _ = registry.register("log", |params| {
        Ok(Box::new(LogNode::new(params.clone())) as Box<dyn Node>)
    });
    let _ = registry.register("set_value", |params| {
        Ok(Box::new(SetValueNode::new(params.clone())) as Box<dyn Node>)
    });
    let _ = registry.register("delay", |params| {
        Ok(Box::new(DelayNode::new(params.clone())) as Box<dyn Node>)
    });
    let _ = registry.register("branch", |params| {
        Ok(Box::new(BranchNode::new(params.clone())) as Box<dyn Node>)
    });
    let _ = registry.register("transform", |params| {
        Ok(Box::new(TransformNode::new(params.clone())) as Box<dyn Node>)
    });
}

fn param_str(params: &Value, name: &str) -> Result<String, NodeError> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| NodeError::MissingParameter(name.to_string()))
}

/// Logs its `message` parameter and passes through.
pub struct LogNode {
    params: Value,
}

impl LogNode {
    pub fn new(params: Value) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Node for LogNode {
    fn set_params(&mut self, params: Value) {
        self.params = params;
    }

    async fn exec(&mut self, _prepared: Value) -> Result<Value, NodeError> {
        let message = param_str(&self.params, "message")?;
        info!(target: "flowrunner::node", "{message}");
        Ok(Value::String(message))
    }
}

/// Writes its `value` parameter into the shared state under `key`.
pub struct SetValueNode {
    params: Value,
}

impl SetValueNode {
    pub fn new(params: Value) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Node for SetValueNode {
    fn set_params(&mut self, params: Value) {
        self.params = params;
    }

    async fn exec(&mut self, _prepared: Value) -> Result<Value, NodeError> {
        self.params
            .get("value")
            .cloned()
            .ok_or_else(|| NodeError::MissingParameter("value".to_string()))
    }

    async fn post(
        &mut self,
        shared: &mut SharedState,
        _prepared: Value,
        result: Value,
    ) -> Result<Action, NodeError> {
        let key = param_str(&self.params, "key")?;
        shared.set(key, result.clone());
        shared.set("result", result);
        Ok(Action::default_action())
    }
}

/// Sleeps for `seconds` before continuing.
pub struct DelayNode {
    params: Value,
}

impl DelayNode {
    pub fn new(params: Value) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Node for DelayNode {
    fn set_params(&mut self, params: Value) {
        self.params = params;
    }

    async fn exec(&mut self, _prepared: Value) -> Result<Value, NodeError> {
        let seconds = self
            .params
            .get("seconds")
            .and_then(Value::as_f64)
            .ok_or_else(|| NodeError::MissingParameter("seconds".to_string()))?;
        if seconds < 0.0 {
            return Err(NodeError::InvalidParameter {
                name: "seconds".to_string(),
                reason: "must be non-negative".to_string(),
            });
        }
        tokio::time::sleep(std::time::Duration::from_secs_f64(seconds)).await;
        Ok(Value::from(seconds))
    }
}

/// Routes on a shared-state value: returns the `true` action when
/// `shared[key]` equals the `equals` parameter (or is truthy when `equals`
/// is omitted), `false` otherwise.
pub struct BranchNode {
    params: Value,
}

impl BranchNode {
    pub fn new(params: Value) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Node for BranchNode {
    fn set_params(&mut self, params: Value) {
        self.params = params;
    }

    async fn prep(&mut self, shared: &SharedState) -> Result<Value, NodeError> {
        let key = param_str(&self.params, "key")?;
        Ok(shared.get(&key).cloned().unwrap_or(Value::Null))
    }

    async fn exec(&mut self, prepared: Value) -> Result<Value, NodeError> {
        let outcome = match self.params.get("equals") {
            Some(expected) => &prepared == expected,
            None => match &prepared {
                Value::Null => false,
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                Value::String(s) => !s.is_empty(),
                Value::Array(a) => !a.is_empty(),
                Value::Object(o) => !o.is_empty(),
            },
        };
        Ok(Value::Bool(outcome))
    }

    async fn post(
        &mut self,
        shared: &mut SharedState,
        _prepared: Value,
        result: Value,
    ) -> Result<Action, NodeError> {
        let outcome = result.as_bool().unwrap_or(false);
        shared.set("result", result);
        Ok(Action::new(if outcome { "true" } else { "false" }))
    }
}

/// Emits its `value` parameter as the node result. Because parameters pass
/// through the expression evaluator, `value` can be any template over
/// secrets, prior results, and shared state.
pub struct TransformNode {
    params: Value,
}

impl TransformNode {
    pub fn new(params: Value) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Node for TransformNode {
    fn set_params(&mut self, params: Value) {
        self.params = params;
    }

    async fn exec(&mut self, _prepared: Value) -> Result<Value, NodeError> {
        self.params
            .get("value")
            .cloned()
            .ok_or_else(|| NodeError::MissingParameter("value".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_value_node_writes_key_and_result() {
        let mut node = SetValueNode::new(json!({"key": "greeting", "value": "hi"}));
        let mut shared = SharedState::new();

        let prepared = node.prep(&shared).await.unwrap();
        let result = node.exec(prepared.clone()).await.unwrap();
        let action = node.post(&mut shared, prepared, result).await.unwrap();

        assert_eq!(action, Action::default_action());
        assert_eq!(shared.get("greeting"), Some(&json!("hi")));
        assert_eq!(shared.get("result"), Some(&json!("hi")));
    }

    #[tokio::test]
    async fn test_branch_node_equals() {
        let mut node = BranchNode::new(json!({"key": "mode", "equals": "batch"}));
        let mut shared = SharedState::new();
        shared.set("mode", json!("batch"));

        let prepared = node.prep(&shared).await.unwrap();
        let result = node.exec(prepared.clone()).await.unwrap();
        let action = node.post(&mut shared, prepared, result).await.unwrap();
        assert_eq!(action, Action::new("true"));
    }

    #[tokio::test]
    async fn test_branch_node_truthiness_without_equals() {
        let mut node = BranchNode::new(json!({"key": "flag"}));
        let mut shared = SharedState::new();
        shared.set("flag", json!(""));

        let prepared = node.prep(&shared).await.unwrap();
        let result = node.exec(prepared.clone()).await.unwrap();
        let action = node.post(&mut shared, prepared, result).await.unwrap();
        assert_eq!(action, Action::new("false"));
    }

    #[tokio::test]
    async fn test_log_node_requires_message() {
        let mut node = LogNode::new(json!({}));
        let err = node.exec(Value::Null).await.unwrap_err();
        assert!(matches!(err, NodeError::MissingParameter(_)));
    }

    #[test]
    fn test_register_builtin_nodes() {
        let mut registry = NodeRegistry::new();
        register_builtin_nodes(&mut registry);
        for name in ["log", "set_value", "delay", "branch", "transform"] {
            assert!(registry.contains(name), "missing builtin: {name}");
        }
    }
}
