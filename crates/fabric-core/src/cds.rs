//! Boundary to the coordinated data structure (CDS).
//!
//! The core never mutates a data structure. It only reads a flat listing of
//! element identities for coverage checks and section construction, so a
//! data structure participates by implementing [`DataStructure`].

use std::collections::HashMap;
use std::fmt;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::id::ElementId;

/// A node of the data structure, as seen by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CdsNode {
    pub id: ElementId,
    pub immutable: bool,
}

/// An edge of the data structure, as seen by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CdsEdge {
    pub id: ElementId,
    pub immutable: bool,
    pub source: ElementId,
    pub destination: ElementId,
}

/// Implemented by any data structure whose access is coordinated.
pub trait DataStructure: fmt::Debug + Send + Sync {
    /// Every node currently in the structure.
    fn list_nodes(&self) -> Vec<CdsNode>;
    /// Every edge currently in the structure.
    fn list_edges(&self) -> Vec<CdsEdge>;
}

/// A data structure given by a fixed listing.
#[derive(Debug, Clone, Default)]
pub struct FixedStructure {
    nodes: Vec<CdsNode>,
    edges: Vec<CdsEdge>,
}

impl FixedStructure {
    pub fn new(nodes: Vec<CdsNode>, edges: Vec<CdsEdge>) -> Self {
        FixedStructure { nodes, edges }
    }

    /// Builds a mutable-element listing from raw ids. Edges are given as
    /// `(edge_id, source, destination)`.
    pub fn from_ids(nodes: &[u64], edges: &[(u64, u64, u64)]) -> Self {
        let nodes = nodes
            .iter()
            .map(|&id| CdsNode {
                id: ElementId(id),
                immutable: false,
            })
            .collect();
        let edges = edges
            .iter()
            .map(|&(id, source, destination)| CdsEdge {
                id: ElementId(id),
                immutable: false,
                source: ElementId(source),
                destination: ElementId(destination),
            })
            .collect();
        FixedStructure { nodes, edges }
    }
}

impl DataStructure for FixedStructure {
    fn list_nodes(&self) -> Vec<CdsNode> {
        self.nodes.clone()
    }

    fn list_edges(&self) -> Vec<CdsEdge> {
        self.edges.clone()
    }
}

/// A directed petgraph view of a data structure, used to walk it when
/// carving sections.
#[derive(Debug, Clone)]
pub struct ElementGraph {
    graph: DiGraph<ElementId, CdsEdge>,
    index: HashMap<ElementId, NodeIndex>,
}

impl ElementGraph {
    /// Snapshots the current listing of `ds`. Edge endpoints missing from the
    /// node listing are still added as vertices.
    pub fn build(ds: &dyn DataStructure) -> Self {
        let mut view = ElementGraph {
            graph: DiGraph::new(),
            index: HashMap::new(),
        };
        for node in ds.list_nodes() {
            view.vertex(node.id);
        }
        for edge in ds.list_edges() {
            let source = view.vertex(edge.source);
            let destination = view.vertex(edge.destination);
            view.graph.add_edge(source, destination, edge);
        }
        view
    }

    fn vertex(&mut self, id: ElementId) -> NodeIndex {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.graph.add_node(id);
        self.index.insert(id, idx);
        idx
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.index.contains_key(&id)
    }

    /// Edges leaving `node`, in insertion order.
    pub fn outgoing(&self, node: ElementId) -> Vec<CdsEdge> {
        let Some(&idx) = self.index.get(&node) else {
            return Vec::new();
        };
        let mut edges: Vec<CdsEdge> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| *e.weight())
            .collect();
        // petgraph yields the most recently added edge first.
        edges.reverse();
        edges
    }

    /// Edges with `node` as either endpoint.
    pub fn touching(&self, node: ElementId) -> Vec<CdsEdge> {
        let Some(&idx) = self.index.get(&node) else {
            return Vec::new();
        };
        let mut edges: Vec<CdsEdge> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .chain(self.graph.edges_directed(idx, Direction::Incoming))
            .map(|e| *e.weight())
            .collect();
        edges.sort_by_key(|e| e.id);
        edges.dedup_by_key(|e| e.id);
        edges
    }
}
