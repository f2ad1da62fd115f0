//! Sections: the subset of a data structure's nodes and edges a UI owns.
//!
//! Sections are extensional lists rather than predicates evaluated by
//! traversal, so checking membership during an access procedure never walks
//! the data structure. A [`SectionView`] is carved once from a
//! [`DataStructure`] and then kept current through
//! [`Section::update_node_list`] / [`Section::update_edge_list`].

use std::fmt;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::cds::{DataStructure, ElementGraph};
use crate::id::ElementId;

/// Insertion-ordered node identities with set-like uniqueness.
pub type NodeList = IndexSet<ElementId>;

/// Insertion-ordered edge identities with set-like uniqueness.
pub type EdgeList = IndexSet<ElementId>;

/// Read/update interface over the elements a UI owns.
pub trait Section: fmt::Debug + Send + Sync {
    fn list_nodes(&self) -> &NodeList;
    fn list_edges(&self) -> &EdgeList;
    fn update_node_list(&mut self, nodes: NodeList);
    fn update_edge_list(&mut self, edges: EdgeList);

    fn contains_node(&self, id: ElementId) -> bool {
        self.list_nodes().contains(&id)
    }

    fn contains_edge(&self, id: ElementId) -> bool {
        self.list_edges().contains(&id)
    }
}

/// How a section was carved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectionKind {
    /// Everything reachable from a root node.
    Branch,
    /// A run of a linear structure between two nodes.
    Partition,
    /// Chosen nodes plus every edge touching any of them.
    Subset,
    /// Chosen nodes plus the edges running between them.
    Subgraph,
    /// Arbitrary nodes and arbitrary edges.
    Disjoint,
}

/// The concrete section type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionView {
    kind: SectionKind,
    nodes: NodeList,
    edges: EdgeList,
}

impl SectionView {
    pub fn kind(&self) -> SectionKind {
        self.kind
    }

    /// Arbitrary nodes and edges, taken as given.
    pub fn disjoint(
        nodes: impl IntoIterator<Item = ElementId>,
        edges: impl IntoIterator<Item = ElementId>,
    ) -> Self {
        SectionView {
            kind: SectionKind::Disjoint,
            nodes: nodes.into_iter().collect(),
            edges: edges.into_iter().collect(),
        }
    }

    /// `nodes` plus every edge whose endpoints are both in `nodes`.
    pub fn subgraph(nodes: impl IntoIterator<Item = ElementId>, ds: &dyn DataStructure) -> Self {
        let nodes: NodeList = nodes.into_iter().collect();
        let edges = ds
            .list_edges()
            .into_iter()
            .filter(|e| nodes.contains(&e.source) && nodes.contains(&e.destination))
            .map(|e| e.id)
            .collect();
        SectionView {
            kind: SectionKind::Subgraph,
            nodes,
            edges,
        }
    }

    /// `nodes` plus every edge that touches any of them.
    pub fn subset(nodes: impl IntoIterator<Item = ElementId>, ds: &dyn DataStructure) -> Self {
        let nodes: NodeList = nodes.into_iter().collect();
        let view = ElementGraph::build(ds);
        let mut edges = EdgeList::new();
        for &node in &nodes {
            for edge in view.touching(node) {
                edges.insert(edge.id);
            }
        }
        SectionView {
            kind: SectionKind::Subset,
            nodes,
            edges,
        }
    }

    /// Every node reachable from `root` along edge direction, and every edge
    /// leaving a reached node.
    pub fn branch(root: ElementId, ds: &dyn DataStructure) -> Self {
        let view = ElementGraph::build(ds);
        let mut nodes = NodeList::new();
        let mut edges = EdgeList::new();
        let mut stack = vec![root];

        while let Some(node) = stack.pop() {
            if !nodes.insert(node) {
                continue;
            }
            // Reverse so the first edge is explored first.
            for edge in view.outgoing(node).into_iter().rev() {
                edges.insert(edge.id);
                stack.push(edge.destination);
            }
        }

        SectionView {
            kind: SectionKind::Branch,
            nodes,
            edges,
        }
    }

    /// The run from `start` to `end` of a linear structure (every node has
    /// at most two edges). The walk stops expanding at `end`; if `end` is not
    /// reachable the partition runs to the end of the structure.
    pub fn partition(start: ElementId, end: ElementId, ds: &dyn DataStructure) -> Self {
        let view = ElementGraph::build(ds);
        let mut nodes = NodeList::new();
        let mut edges = EdgeList::new();
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            if !nodes.insert(node) || node == end {
                continue;
            }
            for edge in view.outgoing(node).into_iter().rev() {
                if edges.insert(edge.id) {
                    stack.push(edge.destination);
                }
            }
        }

        SectionView {
            kind: SectionKind::Partition,
            nodes,
            edges,
        }
    }
}

impl Section for SectionView {
    fn list_nodes(&self) -> &NodeList {
        &self.nodes
    }

    fn list_edges(&self) -> &EdgeList {
        &self.edges
    }

    fn update_node_list(&mut self, nodes: NodeList) {
        self.nodes = nodes;
    }

    fn update_edge_list(&mut self, edges: EdgeList) {
        self.edges = edges;
    }
}

/// Unions several sections into one [`SectionKind::Disjoint`] view, keeping
/// first-seen order and dropping duplicates.
pub fn compose_sections(sections: &[&dyn Section]) -> SectionView {
    let mut nodes = NodeList::new();
    let mut edges = EdgeList::new();
    for section in sections {
        nodes.extend(section.list_nodes().iter().copied());
        edges.extend(section.list_edges().iter().copied());
    }
    SectionView {
        kind: SectionKind::Disjoint,
        nodes,
        edges,
    }
}
