//! # Node System
//!
//! Nodes are the units of work in a flow. Every node follows the same
//! three-phase protocol:
//!
//! 1. **`prep(shared)`** — read inputs from the shared state; returns the
//!    prepared input value. Read-only and safe to repeat.
//! 2. **`exec(prepared)`** — perform the actual work. Retries re-invoke
//!    `exec` with the same prepared input, so implementations keep their
//!    side effects controllable.
//! 3. **`post(shared, prepared, result)`** — write outputs back into the
//!    shared state (conventionally under `result`) and return the routing
//!    [`Action`].
//!
//! Retry policy is intrinsic to the node: `max_retries` counts total
//! attempts (1 means no retry) and `wait` is the pause between attempts.
//! When every attempt fails, a node may absorb the failure through
//! [`Node::exec_fallback`], yielding a result and the `error` action;
//! otherwise the failure terminates the whole execution.
//!
//! Nodes are constructed by type-name through the [`registry`], from the
//! parameter map declared in the flow document. Parameters pass through the
//! expression evaluator on every execution, and the resolved map is handed
//! to the node via [`Node::set_params`] before its phases run.

pub mod registry;

#[cfg(feature = "builtin-nodes")]
pub mod builtin;

use crate::action::Action;
use crate::shared::SharedState;
use async_trait::async_trait;
use serde_json::Value;

/// Errors produced inside node phases.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("preparation error: {0}")]
    Prep(String),
    #[error("execution error: {0}")]
    Exec(String),
    #[error("post error: {0}")]
    Post(String),
    #[error("missing required parameter: {0}")]
    MissingParameter(String),
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },
}

impl From<String> for NodeError {
    fn from(message: String) -> Self {
        NodeError::Exec(message)
    }
}

impl From<&str> for NodeError {
    fn from(message: &str) -> Self {
        NodeError::Exec(message.to_string())
    }
}

/// Per-node retry policy, parsed from the flow document's `retry` mapping.
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total exec attempts. 1 means no retry.
    pub max_retries: u32,
    /// Seconds to sleep between attempts.
    pub wait: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            wait: 0.0,
        }
    }
}

impl RetryPolicy {
    /// The pause between attempts as a [`std::time::Duration`].
    pub fn wait_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.wait.max(0.0))
    }
}

/// The capability contract every node implements.
///
/// All phase inputs and outputs are JSON values so that nodes remain
/// type-erased behind `Box<dyn Node>`; a node validates the shapes it
/// cares about in `prep`.
impl std::fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<dyn Node>")
    }
}

#[async_trait]
pub trait Node: Send {
    /// Receive the parameter map for the current execution, already passed
    /// through the expression evaluator. Called once before `prep`.
    fn set_params(&mut self, params: Value);

    /// Read inputs from the shared state.
    async fn prep(&mut self, shared: &SharedState) -> Result<Value, NodeError> {
        let _ = shared;
        Ok(Value::Null)
    }

    /// Perform the work. Re-invoked with the same prepared input on retry.
    async fn exec(&mut self, prepared: Value) -> Result<Value, NodeError>;

    /// Write outputs and choose the next edge.
    async fn post(
        &mut self,
        shared: &mut SharedState,
        prepared: Value,
        result: Value,
    ) -> Result<Action, NodeError> {
        let _ = prepared;
        shared.set("result", result);
        Ok(Action::default_action())
    }

    /// Absorb an exhausted-retries failure, producing a substitute result.
    /// The runtime then runs `post` and routes on the `error` action.
    ///
    /// The default declines, which fails the execution.
    async fn exec_fallback(&mut self, prepared: Value, error: NodeError) -> Result<Value, NodeError> {
        let _ = prepared;
        Err(error)
    }

    /// Whether `exec_fallback` is implemented. The runtime consults this to
    /// decide between the fallback path and failing the execution.
    fn has_fallback(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoNode {
        params: Value,
    }

    #[async_trait]
    impl Node for EchoNode {
        fn set_params(&mut self, params: Value) {
            self.params = params;
        }

        async fn prep(&mut self, shared: &SharedState) -> Result<Value, NodeError> {
            Ok(shared.get("input").cloned().unwrap_or(Value::Null))
        }

        async fn exec(&mut self, prepared: Value) -> Result<Value, NodeError> {
            Ok(json!({"echo": prepared, "params": self.params}))
        }
    }

    #[tokio::test]
    async fn test_default_post_writes_result_and_routes_default() {
        let mut node = EchoNode { params: Value::Null };
        node.set_params(json!({"tag": "t"}));

        let mut shared = SharedState::new();
        shared.set("input", json!("hello"));

        let prepared = node.prep(&shared).await.unwrap();
        let result = node.exec(prepared.clone()).await.unwrap();
        let action = node.post(&mut shared, prepared, result.clone()).await.unwrap();

        assert_eq!(action, Action::default_action());
        assert_eq!(shared.get("result"), Some(&result));
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy: RetryPolicy = serde_json::from_value(json!({})).unwrap();
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.wait, 0.0);

        let policy: RetryPolicy = serde_json::from_value(json!({"max_retries": 3, "wait": 0.5})).unwrap();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.wait_duration(), std::time::Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_default_fallback_declines() {
        let mut node = EchoNode { params: Value::Null };
        let err = node
            .exec_fallback(Value::Null, NodeError::Exec("boom".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Exec(_)));
        assert!(!node.has_fallback());
    }
}
