//! # Action System
//!
//! Actions are the edge labels of a flow graph. Every node finishes its
//! `post` phase by returning an action, and the runtime follows the edge
//! registered under that label (or terminates the execution when no edge
//! is registered).
//!
//! Actions are plain strings. A handful of labels are well-known —
//! `default` for the ordinary path, `success` and `error` for the outcome
//! paths — but flows are free to route on any label they like.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The label a node returns from its `post` phase, selecting the next edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(String);

impl Action {
    /// The ordinary continuation label.
    pub const DEFAULT: &'static str = "default";
    /// Label conventionally taken on success.
    pub const SUCCESS: &'static str = "success";
    /// Label taken when a node's fallback absorbs an exec failure.
    pub const ERROR: &'static str = "error";

    /// Create an action from any label.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// The `default` action.
    pub fn default_action() -> Self {
        Self::new(Self::DEFAULT)
    }

    /// The `error` action.
    pub fn error_action() -> Self {
        Self::new(Self::ERROR)
    }

    /// The label as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Action {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

impl From<String> for Action {
    fn from(label: String) -> Self {
        Self(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_labels() {
        let action: Action = "continue".into();
        assert_eq!(action.as_str(), "continue");
        assert_eq!(action.to_string(), "continue");

        assert_eq!(Action::default_action().as_str(), "default");
        assert_eq!(Action::error_action().as_str(), "error");
    }

    #[test]
    fn test_action_serde_transparent() {
        let action = Action::new("success");
        let json = serde_json::to_string(&action).unwrap();
        assert_eq!(json, "\"success\"");

        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }
}
