//! # Flow Compilation
//!
//! From YAML bytes to a runnable graph: the [`loader`] validates the
//! document shape and wiring, materialises each node through the plugin
//! registry, and produces the [`graph::FlowGraph`] the runtime executes.

pub mod graph;
pub mod loader;

pub use graph::{FlowGraph, GraphNode};
pub use loader::{FlowDocument, LoaderError, build_graph, build_graph_from_document};
