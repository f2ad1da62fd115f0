//! DependencyGraph: the permanent topology of UI and Temporal nodes.
//!
//! [`DependencyGraph`] owns the node arena, the shared [`Topology`], an
//! optional handle to the coordinated data structure (for coverage checks)
//! and the registry of active VDG ids. Acyclicity is verified on demand
//! through [`DependencyGraph::cycle_detect`], never enforced on insertion.
//!
//! All mutation goes through `&mut self`; callers sharing a graph across
//! tasks put it behind one lock. The per-edge channels are never locked.

use std::sync::Arc;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::cds::DataStructure;
use crate::error::GraphError;
use crate::id::{self, ElementId, NodeId, ProcedureId, VdgId};
use crate::node::GraphNode;
use crate::section::Section;
use crate::signal::{NodeSignal, SignalInbox};
use crate::topology::{self, NodeArena, Topology};

/// Two UIs addressing the same data-structure nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalityConflict {
    pub first: NodeId,
    pub second: NodeId,
    pub shared: Vec<ElementId>,
}

/// The long-lived dependency graph.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    data: Option<Arc<dyn DataStructure>>,
    nodes: NodeArena,
    topology: Topology,
    vdgs: IndexSet<VdgId>,
}

impl DependencyGraph {
    /// An empty graph with no data structure attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty graph coordinating access to `data`.
    pub fn with_data_structure(data: Arc<dyn DataStructure>) -> Self {
        DependencyGraph {
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn set_data_structure(&mut self, data: Arc<dyn DataStructure>) {
        self.data = Some(data);
    }

    pub fn data_structure(&self) -> Option<&Arc<dyn DataStructure>> {
        self.data.as_ref()
    }

    /// A random id not used by any node of this graph.
    pub fn generate_id(&self) -> NodeId {
        NodeId(id::generate_unique(|c| self.nodes.contains_key(&NodeId(c))))
    }

    // -----------------------------------------------------------------------
    // Node and edge mutation
    // -----------------------------------------------------------------------

    /// Inserts a UI or Temporal node with no dependencies.
    pub fn add_real_node(&mut self, node: GraphNode) -> Result<NodeId, GraphError> {
        if node.is_vdg_node() {
            return Err(GraphError::WrongGraph {
                id: node.id(),
                node_type: node.node_type(),
            });
        }
        self.insert(node)
    }

    fn insert(&mut self, node: GraphNode) -> Result<NodeId, GraphError> {
        let id = node.id();
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode { id });
        }
        self.topology.insert(id);
        self.nodes.insert(id, node);
        tracing::debug!(node = %id, "added node to dependency graph");
        Ok(id)
    }

    /// Makes `dependent` depend on `dependency` and wires the channel the
    /// dependency signals through. Returns `false` if the edge already
    /// existed, in which case nothing changes.
    pub fn add_edge(&mut self, dependent: NodeId, dependency: NodeId) -> Result<bool, GraphError> {
        for id in [dependent, dependency] {
            if !self.nodes.contains_key(&id) {
                return Err(GraphError::NodeNotFound { id });
            }
        }
        if !self.topology.add_edge(dependent, dependency) {
            return Ok(false);
        }
        topology::connect(&mut self.nodes, dependent, dependency)?;
        tracing::debug!(%dependent, %dependency, "added dependency edge");
        Ok(true)
    }

    /// Inserts a virtual UI or virtual Temporal node.
    pub fn add_virtual_ui(&mut self, node: GraphNode) -> Result<NodeId, GraphError> {
        if node.is_vdg_node() {
            return Err(GraphError::WrongGraph {
                id: node.id(),
                node_type: node.node_type(),
            });
        }
        if !node.is_virtual() {
            return Err(GraphError::NotVirtual {
                id: node.id(),
                node_type: node.node_type(),
            });
        }
        self.insert(node)
    }

    /// Removes a virtual UI that no longer depends on anything. Its channel
    /// is dropped from every dependent's signals and it is deleted from every
    /// dependent's dependency list.
    pub fn remove_virtual_ui(&mut self, id: NodeId) -> Result<GraphNode, GraphError> {
        let node = self.nodes.get(&id).ok_or(GraphError::NodeNotFound { id })?;
        if !node.is_virtual() {
            return Err(GraphError::NotVirtual {
                id,
                node_type: node.node_type(),
            });
        }
        let count = self.topology.dependencies(id).len();
        if count != 0 {
            return Err(GraphError::HasDependencies { id, count });
        }

        for dependent in self.topology.dependents(id) {
            topology::disconnect(&mut self.nodes, dependent, id);
        }
        self.topology.remove(id);
        let removed = self
            .nodes
            .remove(&id)
            .ok_or(GraphError::NodeNotFound { id })?;
        tracing::debug!(node = %id, "removed virtual UI");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.topology.ids()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn dependencies(&self, id: NodeId) -> &[NodeId] {
        self.topology.dependencies(id)
    }

    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        self.topology.dependents(id)
    }

    pub fn is_leaf_boundary(&self, id: NodeId) -> bool {
        self.topology.is_leaf_boundary(id)
    }

    pub fn is_root_boundary(&self, id: NodeId) -> bool {
        self.topology.is_root_boundary(id)
    }

    pub fn cycle_detect(&self) -> bool {
        self.topology.cycle_detect()
    }

    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        self.topology.topological_order()
    }

    /// Whether node `id` may run `procedure`.
    pub fn allowed(&self, id: NodeId, procedure: ProcedureId) -> bool {
        self.nodes.get(&id).is_some_and(|n| n.allows(procedure))
    }

    /// Broadcasts from node `id` to its dependents.
    pub fn signal(&self, id: NodeId, signal: NodeSignal) -> Result<usize, GraphError> {
        let node = self.nodes.get(&id).ok_or(GraphError::NodeNotFound { id })?;
        Ok(node.signal(signal))
    }

    /// Handles on node `id`'s dependency channels, for blocking outside the
    /// graph's lock.
    pub fn inboxes(&self, id: NodeId) -> Result<Vec<SignalInbox>, GraphError> {
        let node = self.nodes.get(&id).ok_or(GraphError::NodeNotFound { id })?;
        Ok(node.signals().values().cloned().collect())
    }

    /// The section of UI `id`, for updating after the data structure changed.
    pub fn section_mut(&mut self, id: NodeId) -> Option<&mut (dyn Section + 'static)> {
        self.nodes.get_mut(&id)?.section_mut()
    }

    // -----------------------------------------------------------------------
    // Whole-graph verification
    // -----------------------------------------------------------------------

    /// Every pair of UIs whose sections share data-structure nodes. Pairs of
    /// non-virtual UIs are always checked; a virtual UI is only checked
    /// against a strictly unique one.
    pub fn totality_conflicts(&self) -> Vec<TotalityConflict> {
        let uis: Vec<(&GraphNode, &dyn Section)> = self
            .ids()
            .filter_map(|id| self.nodes.get(&id))
            .filter_map(|n| n.section().map(|s| (n, s)))
            .collect();

        let mut conflicts = Vec::new();
        for (i, (a, sa)) in uis.iter().enumerate() {
            for (b, sb) in &uis[i + 1..] {
                let checked = (!a.is_virtual() && !b.is_virtual()) || a.is_unique() || b.is_unique();
                if !checked {
                    continue;
                }
                let shared: Vec<ElementId> = sa
                    .list_nodes()
                    .iter()
                    .copied()
                    .filter(|e| sb.contains_node(*e))
                    .collect();
                if !shared.is_empty() {
                    conflicts.push(TotalityConflict {
                        first: a.id(),
                        second: b.id(),
                        shared,
                    });
                }
            }
        }
        conflicts
    }

    /// True when no two UIs address overlapping data.
    pub fn totality_unique(&self) -> bool {
        self.totality_conflicts().is_empty()
    }

    /// Every node and edge of the data structure is owned by at least one
    /// non-virtual UI. Vacuously true with no data structure attached.
    /// Walks every section for every element; meant for construction time.
    pub fn covered(&self) -> bool {
        let Some(data) = &self.data else {
            return true;
        };
        let sections: Vec<&dyn Section> = self
            .nodes
            .values()
            .filter(|n| !n.is_virtual())
            .filter_map(|n| n.section())
            .collect();

        for node in data.list_nodes() {
            if !sections.iter().any(|s| s.contains_node(node.id)) {
                tracing::debug!(element = %node.id, "uncovered data-structure node");
                return false;
            }
        }
        for edge in data.list_edges() {
            if !sections.iter().any(|s| s.contains_edge(edge.id)) {
                tracing::debug!(element = %edge.id, "uncovered data-structure edge");
                return false;
            }
        }
        true
    }

    // -----------------------------------------------------------------------
    // VDG registry
    // -----------------------------------------------------------------------

    pub(crate) fn register_vdg(&mut self, vdg: VdgId) {
        self.vdgs.insert(vdg);
    }

    pub(crate) fn deregister_vdg(&mut self, vdg: VdgId) -> bool {
        self.vdgs.shift_remove(&vdg)
    }

    /// Ids of every VDG currently registered with this graph.
    pub fn vdgs(&self) -> impl Iterator<Item = VdgId> + '_ {
        self.vdgs.iter().copied()
    }
}
