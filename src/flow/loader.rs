//! YAML loader and graph builder.
//!
//! Compiles a flow document into a [`FlowGraph`], or fails with a
//! validation error. Every rule here is fatal: unknown node types,
//! successors pointing at undeclared nodes, and nodes unreachable from
//! the start all reject the document before anything runs.
//!
//! Start-node resolution, in order: an explicit top-level `start`, a node
//! literally named `start`, the first declared node.

use super::graph::{FlowGraph, GraphNode};
use crate::node::registry::NodeRegistry;
use crate::node::{NodeError, RetryPolicy};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

/// Errors from document validation and graph build.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("invalid flow YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("flow declares no nodes")]
    NoNodes,
    #[error("unknown node type '{node_type}' on node '{node_id}'")]
    UnknownNodeType { node_id: String, node_type: String },
    #[error("node '{node_id}' routes action '{action}' to undeclared node '{target}'")]
    UnknownSuccessor {
        node_id: String,
        action: String,
        target: String,
    },
    #[error("start node '{0}' is not declared")]
    StartNotFound(String),
    #[error("nodes unreachable from start: {}", .0.join(", "))]
    Unreachable(Vec<String>),
    #[error("node '{node_id}' failed to construct: {source}")]
    Factory {
        node_id: String,
        #[source]
        source: NodeError,
    },
}

/// Top-level shape of a flow document.
#[derive(Debug, Deserialize)]
pub struct FlowDocument {
    #[serde(default)]
    pub metadata: DocumentMetadata,
    pub nodes: IndexMap<String, NodeDeclaration>,
    #[serde(default)]
    pub start: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DocumentMetadata {
    pub name: String,
    pub description: String,
    pub version: String,
}

/// One node entry in the document.
#[derive(Debug, Deserialize)]
pub struct NodeDeclaration {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Action label → successor node id.
    #[serde(default)]
    pub next: HashMap<String, String>,
}

/// Parse and validate YAML bytes into a runnable graph.
pub fn build_graph(definition: &[u8], registry: &NodeRegistry) -> Result<FlowGraph, LoaderError> {
    let document: FlowDocument = serde_yaml::from_slice(definition)?;
    build_graph_from_document(document, registry)
}

/// Compile an already-parsed document.
pub fn build_graph_from_document(
    document: FlowDocument,
    registry: &NodeRegistry,
) -> Result<FlowGraph, LoaderError> {
    if document.nodes.is_empty() {
        return Err(LoaderError::NoNodes);
    }

    let start = resolve_start(&document)?;
    validate(&document, registry)?;
    validate_reachability(&document, &start)?;

    let mut nodes = IndexMap::with_capacity(document.nodes.len());
    for (node_id, declaration) in document.nodes {
        let node = registry
            .build(&declaration.node_type, &declaration.params)
            .map_err(|source| LoaderError::Factory {
                node_id: node_id.clone(),
                source,
            })?;
        nodes.insert(
            node_id,
            GraphNode {
                node,
                params: declaration.params,
                retry: declaration.retry,
                successors: declaration.next,
            },
        );
    }

    Ok(FlowGraph {
        nodes,
        start,
        name: document.metadata.name,
    })
}

fn resolve_start(document: &FlowDocument) -> Result<String, LoaderError> {
    if let Some(start) = &document.start {
        if !document.nodes.contains_key(start) {
            return Err(LoaderError::StartNotFound(start.clone()));
        }
        return Ok(start.clone());
    }
    if document.nodes.contains_key("start") {
        return Ok("start".to_string());
    }
    // Declaration order is preserved, so "first declared" is well-defined.
    document
        .nodes
        .keys()
        .next()
        .cloned()
        .ok_or(LoaderError::NoNodes)
}

fn validate(document: &FlowDocument, registry: &NodeRegistry) -> Result<(), LoaderError> {
    for (node_id, declaration) in &document.nodes {
        if !registry.contains(&declaration.node_type) {
            return Err(LoaderError::UnknownNodeType {
                node_id: node_id.clone(),
                node_type: declaration.node_type.clone(),
            });
        }
        for (action, target) in &declaration.next {
            if !document.nodes.contains_key(target) {
                return Err(LoaderError::UnknownSuccessor {
                    node_id: node_id.clone(),
                    action: action.clone(),
                    target: target.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_reachability(document: &FlowDocument, start: &str) -> Result<(), LoaderError> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    seen.insert(start);
    queue.push_back(start);

    while let Some(node_id) = queue.pop_front() {
        if let Some(declaration) = document.nodes.get(node_id) {
            for target in declaration.next.values() {
                if seen.insert(target) {
                    queue.push_back(target);
                }
            }
        }
    }

    let unreachable: Vec<String> = document
        .nodes
        .keys()
        .filter(|id| !seen.contains(id.as_str()))
        .cloned()
        .collect();
    if unreachable.is_empty() {
        Ok(())
    } else {
        Err(LoaderError::Unreachable(unreachable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::builtin::register_builtin_nodes;

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        register_builtin_nodes(&mut registry);
        registry
    }

    #[test]
    fn test_build_simple_graph() {
        let yaml = br#"
metadata:
  name: greeter
nodes:
  start:
    type: log
    params:
      message: hello
    next:
      default: finish
  finish:
    type: set_value
    params:
      key: done
      value: true
"#;
        let graph = build_graph(yaml, &registry()).unwrap();
        assert_eq!(graph.start, "start");
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.successor("start", "default"), Some("finish"));
        assert_eq!(graph.successor("finish", "default"), None);
        assert_eq!(graph.name, "greeter");
    }

    #[test]
    fn test_explicit_start_wins() {
        let yaml = br#"
start: entry
nodes:
  entry:
    type: log
    params: {message: go}
"#;
        let graph = build_graph(yaml, &registry()).unwrap();
        assert_eq!(graph.start, "entry");
    }

    #[test]
    fn test_first_declared_node_is_default_start() {
        let yaml = br#"
nodes:
  alpha:
    type: log
    params: {message: a}
    next: {default: beta}
  beta:
    type: log
    params: {message: b}
"#;
        let graph = build_graph(yaml, &registry()).unwrap();
        assert_eq!(graph.start, "alpha");
    }

    #[test]
    fn test_unknown_node_type_fails() {
        let yaml = br#"
nodes:
  start:
    type: teleport
"#;
        let err = build_graph(yaml, &registry()).unwrap_err();
        assert!(matches!(err, LoaderError::UnknownNodeType { .. }));
    }

    #[test]
    fn test_dangling_successor_fails() {
        let yaml = br#"
nodes:
  start:
    type: log
    params: {message: x}
    next:
      default: nowhere
"#;
        let err = build_graph(yaml, &registry()).unwrap_err();
        assert!(matches!(err, LoaderError::UnknownSuccessor { .. }));
    }

    #[test]
    fn test_unreachable_node_fails() {
        let yaml = br#"
nodes:
  start:
    type: log
    params: {message: x}
  island:
    type: log
    params: {message: unreachable}
"#;
        let err = build_graph(yaml, &registry()).unwrap_err();
        let LoaderError::Unreachable(nodes) = err else {
            panic!("expected unreachable error, got {err:?}");
        };
        assert_eq!(nodes, vec!["island".to_string()]);
    }

    #[test]
    fn test_missing_start_reference_fails() {
        let yaml = br#"
start: ghost
nodes:
  start:
    type: log
    params: {message: x}
"#;
        let err = build_graph(yaml, &registry()).unwrap_err();
        assert!(matches!(err, LoaderError::StartNotFound(_)));
    }

    #[test]
    fn test_invalid_yaml_fails() {
        assert!(matches!(
            build_graph(b": not yaml [", &registry()),
            Err(LoaderError::Yaml(_))
        ));
    }

    #[test]
    fn test_retry_mapping_parsed() {
        let yaml = br#"
nodes:
  start:
    type: log
    params: {message: x}
    retry:
      max_retries: 3
      wait: 0.25
"#;
        let graph = build_graph(yaml, &registry()).unwrap();
        let entry = &graph.nodes["start"];
        assert_eq!(entry.retry.max_retries, 3);
        assert_eq!(entry.retry.wait, 0.25);
    }
}
