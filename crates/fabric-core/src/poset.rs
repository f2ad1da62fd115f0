//! Priority-driven ordering of operations into a VDG.
//!
//! [`Poset::order`] inserts a node with priority `p` and wires it against
//! every operation already present, in insertion order:
//!
//! - an operation `v` with `v.priority <= p` that has not started becomes a
//!   dependency of the new node;
//! - an operation `v` with `v.priority > p` becomes a dependent of the new
//!   node. If `v` has started its dependency list is frozen; the edge is
//!   skipped and reported in [`Placement::skipped`].
//!
//! Every edge runs from a node to one with a strictly smaller
//! `(priority, insertion position)`, so ordering alone never closes a cycle.

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::id::NodeId;
use crate::node::{GraphNode, VirtualState};
use crate::vdg::Vdg;

/// Which existing operations a new one is ordered against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderingScope {
    /// Every operation in the VDG.
    #[default]
    Global,
    /// Only operations acting on the same (V)UI. An operation with no
    /// subspace is ordered against everything.
    Subspace,
}

impl std::str::FromStr for OrderingScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "global" => Ok(OrderingScope::Global),
            "subspace" => Ok(OrderingScope::Subspace),
            other => Err(format!("unknown ordering scope '{other}'")),
        }
    }
}

/// The edges one call to [`Poset::order`] created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub node: NodeId,
    /// Operations the new node now waits on.
    pub dependencies: Vec<NodeId>,
    /// Operations that now wait on the new node.
    pub dependents: Vec<NodeId>,
    /// Started operations that should have waited on the new node.
    pub skipped: Vec<NodeId>,
    /// Whether the node was hung directly under the root.
    pub anchored: bool,
}

/// The ordering policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Poset {
    scope: OrderingScope,
}

impl Poset {
    pub fn new(scope: OrderingScope) -> Self {
        Poset { scope }
    }

    pub fn scope(&self) -> OrderingScope {
        self.scope
    }

    fn conflicts(&self, a: Option<NodeId>, b: Option<NodeId>) -> bool {
        match (self.scope, a, b) {
            (OrderingScope::Global, _, _) => true,
            (OrderingScope::Subspace, Some(a), Some(b)) => a == b,
            (OrderingScope::Subspace, _, _) => true,
        }
    }

    /// Inserts `node` into `vdg` and wires its edges by priority. In a
    /// rooted VDG a node left without dependents is hung under the root.
    pub fn order(&self, vdg: &mut Vdg, node: GraphNode) -> Result<Placement, GraphError> {
        let priority = node.priority();
        let space = node.space();
        let existing: Vec<(NodeId, i32, bool, Option<NodeId>)> = vdg
            .ids()
            .filter_map(|id| vdg.node(id))
            .map(|v| (v.id(), v.priority(), v.started(), v.space()))
            .collect();

        let id = vdg.add_virtual_node(node)?;
        let mut placement = Placement {
            node: id,
            dependencies: Vec::new(),
            dependents: Vec::new(),
            skipped: Vec::new(),
            anchored: false,
        };

        for (v, v_priority, v_started, v_space) in existing {
            if !self.conflicts(space, v_space) {
                continue;
            }
            if v_priority <= priority {
                if !v_started && vdg.add_virtual_edge(id, v)? {
                    placement.dependencies.push(v);
                }
            } else {
                match vdg.add_virtual_edge(v, id) {
                    Ok(true) => placement.dependents.push(v),
                    Ok(false) => {}
                    Err(GraphError::AlreadyStarted { .. }) => {
                        tracing::warn!(node = %id, started = %v, "skipped edge onto started operation");
                        placement.skipped.push(v);
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        if let Some(root) = vdg.root() {
            if placement.dependents.is_empty() {
                vdg.add_virtual_edge(root, id)?;
                placement.anchored = true;
            }
        }
        vdg.set_state(id, VirtualState::Waiting)?;

        tracing::debug!(
            vdg = %vdg.id(),
            node = %id,
            priority,
            dependencies = placement.dependencies.len(),
            dependents = placement.dependents.len(),
            "ordered operation"
        );
        Ok(placement)
    }

    /// Orders each of `nodes` in turn.
    pub fn generate_graph(
        &self,
        vdg: &mut Vdg,
        nodes: impl IntoIterator<Item = GraphNode>,
    ) -> Result<Vec<Placement>, GraphError> {
        nodes.into_iter().map(|n| self.order(vdg, n)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DependencyGraph;

    fn op(id: u64, priority: i32, space: u64) -> GraphNode {
        GraphNode::virtual_op(NodeId(id), Some(NodeId(space)), Vec::new()).with_priority(priority)
    }

    fn edges(vdg: &Vdg) -> Vec<(u64, u64)> {
        let root = vdg.root();
        let mut edges: Vec<(u64, u64)> = vdg
            .topology()
            .edges()
            .filter(|(a, _)| Some(*a) != root)
            .map(|(a, b)| (a.0, b.0))
            .collect();
        edges.sort();
        edges
    }

    #[test]
    fn priorities_5_3_3_8() {
        let mut graph = DependencyGraph::new();
        let mut vdg = Vdg::new(&mut graph);
        let poset = Poset::default();
        for (id, p) in [(1, 5), (2, 3), (3, 3), (4, 8)] {
            poset.order(&mut vdg, op(id, p, 50)).unwrap();
        }
        assert_eq!(
            edges(&vdg),
            vec![(1, 2), (1, 3), (3, 2), (4, 1), (4, 2), (4, 3)]
        );
        assert!(!vdg.cycle_detect());
    }

    #[test]
    fn placement_reports_both_directions() {
        let mut graph = DependencyGraph::new();
        let mut vdg = Vdg::with_root(&mut graph);
        let poset = Poset::default();
        let first = poset.order(&mut vdg, op(1, 5, 50)).unwrap();
        assert!(first.anchored);

        let second = poset.order(&mut vdg, op(2, 3, 50)).unwrap();
        assert_eq!(second.dependents, vec![NodeId(1)]);
        assert!(second.dependencies.is_empty());
        assert!(!second.anchored);
        assert_eq!(
            vdg.node(NodeId(2)).and_then(|n| n.state()),
            Some(VirtualState::Waiting)
        );
    }

    #[test]
    fn first_placement_starts_empty() {
        let mut graph = DependencyGraph::new();
        let mut vdg = Vdg::with_root(&mut graph);
        let placement = Poset::default().order(&mut vdg, op(4, 2, 50)).unwrap();
        assert_eq!(
            placement,
            Placement {
                node: NodeId(4),
                dependencies: Vec::new(),
                dependents: Vec::new(),
                skipped: Vec::new(),
                anchored: true,
            }
        );
    }

    #[test]
    fn started_operations_are_skipped() {
        let mut graph = DependencyGraph::new();
        let mut vdg = Vdg::with_root(&mut graph);
        let poset = Poset::default();
        poset.order(&mut vdg, op(1, 5, 50)).unwrap();
        vdg.start(NodeId(1)).unwrap();

        let placement = poset.order(&mut vdg, op(2, 3, 50)).unwrap();
        assert_eq!(placement.skipped, vec![NodeId(1)]);
        assert!(vdg.dependencies(NodeId(1)).is_empty());
        assert!(placement.anchored);

        // A started operation with a lower priority is not waited on either.
        let placement = poset.order(&mut vdg, op(3, 9, 50)).unwrap();
        assert_eq!(placement.dependencies, vec![NodeId(2)]);
    }

    #[test]
    fn subspace_scope_keeps_spaces_apart() {
        let mut graph = DependencyGraph::new();
        let mut vdg = Vdg::with_root(&mut graph);
        let poset = Poset::new(OrderingScope::Subspace);
        poset.order(&mut vdg, op(1, 5, 50)).unwrap();
        poset.order(&mut vdg, op(2, 3, 60)).unwrap();
        poset.order(&mut vdg, op(3, 8, 50)).unwrap();
        assert_eq!(edges(&vdg), vec![(3, 1)]);

        let unscoped = GraphNode::virtual_op(NodeId(4), None, Vec::new()).with_priority(1);
        let placement = poset.order(&mut vdg, unscoped).unwrap();
        assert_eq!(placement.dependents.len(), 3);
    }

    #[test]
    fn generate_graph_orders_batch() {
        let mut graph = DependencyGraph::new();
        let mut vdg = Vdg::with_root(&mut graph);
        let placements = Poset::default()
            .generate_graph(&mut vdg, vec![op(1, 2, 50), op(2, 1, 50)])
            .unwrap();
        assert_eq!(placements.len(), 2);
        assert_eq!(vdg.topological_order().unwrap()[0], NodeId(2));
    }

    #[test]
    fn scope_parses() {
        assert_eq!("Subspace".parse::<OrderingScope>(), Ok(OrderingScope::Subspace));
        assert!("local".parse::<OrderingScope>().is_err());
    }
}
