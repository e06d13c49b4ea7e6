//! Executable flow graphs.
//!
//! A graph is the compiled form of a flow document: materialised nodes,
//! a successor map keyed by (node id, action label), and a start node.
//! Actions without a registered edge terminate the flow successfully.

use crate::node::{Node, RetryPolicy};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;

/// One materialised node plus its wiring.
pub struct GraphNode {
    /// The node instance built by its factory.
    pub node: Box<dyn Node>,
    /// Declared parameters, templates unresolved. The runtime resolves
    /// them per execution before handing them to the node.
    pub params: Value,
    pub retry: RetryPolicy,
    /// Action label → successor node id.
    pub successors: HashMap<String, String>,
}

/// A validated, runnable flow graph.
pub struct FlowGraph {
    /// Nodes in declaration order.
    pub nodes: IndexMap<String, GraphNode>,
    /// Id of the node execution starts from.
    pub start: String,
    /// Display name from the document metadata, if any.
    pub name: String,
}

impl FlowGraph {
    /// The successor selected by an action, if an edge is registered.
    pub fn successor(&self, node_id: &str, action: &str) -> Option<&str> {
        self.nodes
            .get(node_id)
            .and_then(|entry| entry.successors.get(action))
            .map(String::as_str)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }
}

impl std::fmt::Debug for FlowGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowGraph")
            .field("start", &self.start)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}
