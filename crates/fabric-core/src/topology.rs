//! The adjacency shared by the permanent graph and every VDG.
//!
//! Edges point dependent -> dependency: "this node requires these nodes to
//! complete first". Dependencies are stored per node in insertion order;
//! dependents are derived by scanning, never stored.
//!
//! The topology knows nothing about channels. [`connect`] and [`disconnect`]
//! keep the node arena's signal maps in step with an edge.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use smallvec::SmallVec;

use crate::error::GraphError;
use crate::id::NodeId;
use crate::node::GraphNode;
use crate::signal;

/// Nodes addressed by id.
pub type NodeArena = HashMap<NodeId, GraphNode>;

/// A node's dependency list.
pub type Dependencies = SmallVec<[NodeId; 4]>;

/// `id -> ordered dependencies` for every node of one graph.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    edges: IndexMap<NodeId, Dependencies>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id` with an empty dependency list. Returns `false` if present.
    pub fn insert(&mut self, id: NodeId) -> bool {
        if self.edges.contains_key(&id) {
            return false;
        }
        self.edges.insert(id, Dependencies::new());
        true
    }

    /// Removes `id` and every edge that points at it. Returns the node's own
    /// dependency list.
    pub fn remove(&mut self, id: NodeId) -> Option<Dependencies> {
        let removed = self.edges.shift_remove(&id)?;
        for deps in self.edges.values_mut() {
            deps.retain(|d| *d != id);
        }
        Some(removed)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.edges.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Node ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.edges.keys().copied()
    }

    /// Every `(dependent, dependency)` pair.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.edges
            .iter()
            .flat_map(|(&dependent, deps)| deps.iter().map(move |&d| (dependent, d)))
    }

    /// Appends `dependency` to `dependent`'s list. Returns `false` when the
    /// edge already exists or `dependent` is unknown.
    pub fn add_edge(&mut self, dependent: NodeId, dependency: NodeId) -> bool {
        match self.edges.get_mut(&dependent) {
            Some(deps) if !deps.contains(&dependency) => {
                deps.push(dependency);
                true
            }
            _ => false,
        }
    }

    pub fn remove_edge(&mut self, dependent: NodeId, dependency: NodeId) -> bool {
        let Some(deps) = self.edges.get_mut(&dependent) else {
            return false;
        };
        let before = deps.len();
        deps.retain(|d| *d != dependency);
        deps.len() != before
    }

    pub fn contains_edge(&self, dependent: NodeId, dependency: NodeId) -> bool {
        self.edges
            .get(&dependent)
            .is_some_and(|deps| deps.contains(&dependency))
    }

    /// Direct lookup. Empty for unknown ids.
    pub fn dependencies(&self, id: NodeId) -> &[NodeId] {
        self.edges.get(&id).map(|d| d.as_slice()).unwrap_or(&[])
    }

    /// Every node whose dependency list contains `id`. Linear in the size of
    /// the topology.
    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.contains(&id))
            .map(|(&n, _)| n)
            .collect()
    }

    pub fn is_leaf_boundary(&self, id: NodeId) -> bool {
        self.dependencies(id).is_empty()
    }

    pub fn is_root_boundary(&self, id: NodeId) -> bool {
        !self.edges.values().any(|deps| deps.contains(&id))
    }

    /// Whole-graph DFS over an explicit stack of `(node, next dependency)`
    /// frames. `seen` holds the nodes on the current path, `done` the fully
    /// explored ones; reaching a `seen` node is a back edge.
    pub fn cycle_detect(&self) -> bool {
        let mut seen = HashSet::new();
        let mut done = HashSet::new();
        let mut stack: Vec<(NodeId, usize)> = Vec::new();
        for start in self.ids() {
            if done.contains(&start) {
                continue;
            }
            seen.insert(start);
            stack.push((start, 0));
            while let Some(frame) = stack.last_mut() {
                let (id, next) = *frame;
                match self.dependencies(id).get(next) {
                    Some(&dep) => {
                        frame.1 += 1;
                        if seen.contains(&dep) {
                            return true;
                        }
                        if !done.contains(&dep) {
                            seen.insert(dep);
                            stack.push((dep, 0));
                        }
                    }
                    None => {
                        stack.pop();
                        seen.remove(&id);
                        done.insert(id);
                    }
                }
            }
        }
        false
    }

    /// Every node, dependencies before their dependents.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut graph: DiGraphMap<NodeId, ()> = DiGraphMap::with_capacity(self.len(), 0);
        for id in self.ids() {
            graph.add_node(id);
        }
        for (dependent, dependency) in self.edges() {
            graph.add_edge(dependency, dependent, ());
        }
        toposort(&graph, None).map_err(|_| GraphError::CycleDetected)
    }
}

/// Allocates the channel for `dependent -> dependency` and installs its two
/// ends: the port in the dependency's signalers, the inbox in the
/// dependent's signals.
pub fn connect(nodes: &mut NodeArena, dependent: NodeId, dependency: NodeId) -> Result<(), GraphError> {
    if !nodes.contains_key(&dependent) {
        return Err(GraphError::NodeNotFound { id: dependent });
    }
    let (port, inbox) = signal::channel(dependency, dependent);
    nodes
        .get_mut(&dependency)
        .ok_or(GraphError::NodeNotFound { id: dependency })?
        .connect_dependent(dependent, port);
    if let Some(node) = nodes.get_mut(&dependent) {
        node.connect_dependency(dependency, inbox);
    }
    Ok(())
}

/// Drops both ends of the channel for `dependent -> dependency`. Missing
/// nodes are ignored.
pub fn disconnect(nodes: &mut NodeArena, dependent: NodeId, dependency: NodeId) {
    if let Some(node) = nodes.get_mut(&dependency) {
        node.disconnect_dependent(dependent);
    }
    if let Some(node) = nodes.get_mut(&dependent) {
        node.disconnect_dependency(dependency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u64]) -> Vec<NodeId> {
        raw.iter().map(|&n| NodeId(n)).collect()
    }

    fn chain() -> Topology {
        let mut top = Topology::new();
        for n in 1..=3 {
            top.insert(NodeId(n));
        }
        top.add_edge(NodeId(1), NodeId(2));
        top.add_edge(NodeId(2), NodeId(3));
        top
    }

    #[test]
    fn duplicate_edge_is_noop() {
        let mut top = chain();
        assert!(!top.add_edge(NodeId(1), NodeId(2)));
        assert_eq!(top.dependencies(NodeId(1)), &ids(&[2])[..]);
    }

    #[test]
    fn dependents_are_derived() {
        let mut top = chain();
        top.add_edge(NodeId(3), NodeId(2));
        top.remove_edge(NodeId(3), NodeId(2));
        assert_eq!(top.dependents(NodeId(2)), ids(&[1]));
        assert!(top.is_root_boundary(NodeId(1)));
        assert!(top.is_leaf_boundary(NodeId(3)));
        assert!(!top.is_leaf_boundary(NodeId(1)));
    }

    #[test]
    fn deep_chain_is_walked_without_recursion() {
        const LEN: u64 = 20_000;
        let mut top = Topology::new();
        for n in 0..LEN {
            top.insert(NodeId(n));
        }
        for n in 1..LEN {
            top.add_edge(NodeId(n - 1), NodeId(n));
        }
        assert!(!top.cycle_detect());
        top.add_edge(NodeId(LEN - 1), NodeId(0));
        assert!(top.cycle_detect());
    }

    #[test]
    fn closing_a_cycle_is_detected() {
        let mut top = chain();
        assert!(!top.cycle_detect());
        top.add_edge(NodeId(3), NodeId(1));
        assert!(top.cycle_detect());
        assert_eq!(top.topological_order(), Err(GraphError::CycleDetected));
    }

    #[test]
    fn disconnected_components() {
        let mut top = chain();
        top.insert(NodeId(10));
        top.insert(NodeId(11));
        top.add_edge(NodeId(11), NodeId(10));
        assert!(!top.cycle_detect());
        top.add_edge(NodeId(10), NodeId(11));
        assert!(top.cycle_detect());
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let mut top = Topology::new();
        top.insert(NodeId(1));
        top.add_edge(NodeId(1), NodeId(1));
        assert!(top.cycle_detect());
    }

    #[test]
    fn topological_order_puts_dependencies_first() {
        let order = chain().topological_order().unwrap();
        assert_eq!(order, ids(&[3, 2, 1]));
    }

    #[test]
    fn remove_drops_incoming_edges() {
        let mut top = chain();
        let deps = top.remove(NodeId(2)).unwrap();
        assert_eq!(deps.as_slice(), &ids(&[3])[..]);
        assert!(top.dependencies(NodeId(1)).is_empty());
        assert!(top.remove(NodeId(2)).is_none());
    }

    #[test]
    fn connect_installs_both_ends() {
        let mut nodes = NodeArena::new();
        nodes.insert(NodeId(1), GraphNode::temporal(NodeId(1), NodeId(9)));
        nodes.insert(NodeId(2), GraphNode::temporal(NodeId(2), NodeId(9)));
        connect(&mut nodes, NodeId(1), NodeId(2)).unwrap();

        let port = &nodes[&NodeId(2)].signalers()[&NodeId(1)];
        let inbox = &nodes[&NodeId(1)].signals()[&NodeId(2)];
        assert_eq!(port.channel_id(), inbox.channel_id());

        disconnect(&mut nodes, NodeId(1), NodeId(2));
        assert!(nodes[&NodeId(2)].signalers().is_empty());
        assert!(nodes[&NodeId(1)].signals().is_empty());
    }

    #[test]
    fn connect_unknown_node() {
        let mut nodes = NodeArena::new();
        nodes.insert(NodeId(1), GraphNode::temporal(NodeId(1), NodeId(9)));
        assert_eq!(
            connect(&mut nodes, NodeId(1), NodeId(2)),
            Err(GraphError::NodeNotFound { id: NodeId(2) })
        );
    }
}
