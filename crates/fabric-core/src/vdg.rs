//! Virtual Dependency Graphs.
//!
//! A [`Vdg`] orders the short-lived operations of one session without
//! touching the permanent graph. It holds only Virtual nodes, optionally
//! under a synthetic root that stays the transitive ancestor of every other
//! node: the root depends on each node that nothing else depends on, so
//! waiting on the root's inboxes waits on the whole session.
//!
//! A node moves `Created -> Waiting -> Started -> Unblocked -> Committed |
//! RolledBack` and may only be removed once nothing but the root depends on
//! it. Once started, its dependency list is frozen.

use indexmap::IndexSet;

use crate::access::progress_signal;
use crate::error::GraphError;
use crate::graph::DependencyGraph;
use crate::id::{self, NodeId, ProcedureId, VdgId};
use crate::node::{GraphNode, VirtualState};
use crate::signal::{NodeSignal, SignalInbox, SignalValue};
use crate::topology::{self, NodeArena, Topology};

/// One session's graph of transient operations.
#[derive(Debug)]
pub struct Vdg {
    id: VdgId,
    root: Option<NodeId>,
    nodes: NodeArena,
    topology: Topology,
    /// Every (V)UI some contained node acts on.
    space: IndexSet<NodeId>,
}

impl Vdg {
    /// An unrooted VDG registered with `graph`.
    pub fn new(graph: &mut DependencyGraph) -> Self {
        let id = VdgId::next();
        graph.register_vdg(id);
        tracing::debug!(vdg = %id, "opened VDG");
        Vdg {
            id,
            root: None,
            nodes: NodeArena::new(),
            topology: Topology::new(),
            space: IndexSet::new(),
        }
    }

    /// A VDG with a synthetic root, registered with `graph`.
    pub fn with_root(graph: &mut DependencyGraph) -> Self {
        let mut vdg = Self::new(graph);
        let root = graph.generate_id();
        vdg.topology.insert(root);
        vdg.nodes.insert(root, GraphNode::vdg_root(root));
        vdg.root = Some(root);
        vdg
    }

    /// Deregisters from `graph`. Fails while any operation remains.
    pub fn close(&self, graph: &mut DependencyGraph) -> Result<(), GraphError> {
        let remaining = self.len();
        if remaining != 0 {
            return Err(GraphError::VdgNotEmpty {
                vdg: self.id,
                remaining,
            });
        }
        graph.deregister_vdg(self.id);
        tracing::debug!(vdg = %self.id, "closed VDG");
        Ok(())
    }

    pub fn id(&self) -> VdgId {
        self.id
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Ids of the (V)UIs the contained operations act on.
    pub fn space(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.space.iter().copied()
    }

    /// Number of operations, not counting the root.
    pub fn len(&self) -> usize {
        self.nodes.len() - usize::from(self.root.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A random id not used by any node of this VDG.
    pub fn generate_id(&self) -> NodeId {
        NodeId(id::generate_unique(|c| self.nodes.contains_key(&NodeId(c))))
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Inserts a Virtual node with no dependencies.
    pub fn add_virtual_node(&mut self, node: GraphNode) -> Result<NodeId, GraphError> {
        let id = node.id();
        if !node.is_virtual() {
            return Err(GraphError::NotVirtual {
                id,
                node_type: node.node_type(),
            });
        }
        if !node.is_vdg_node() || node.is_root() {
            return Err(GraphError::WrongGraph {
                id,
                node_type: node.node_type(),
            });
        }
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode { id });
        }
        if let Some(space) = node.space() {
            self.space.insert(space);
        }
        self.topology.insert(id);
        self.nodes.insert(id, node);
        tracing::debug!(vdg = %self.id, node = %id, "added virtual node");
        Ok(id)
    }

    /// Inserts a node and hangs it directly under the root.
    pub fn add_top_node(&mut self, node: GraphNode) -> Result<NodeId, GraphError> {
        let root = self.root.ok_or(GraphError::NoRoot { vdg: self.id })?;
        let id = self.add_virtual_node(node)?;
        self.add_virtual_edge(root, id)?;
        Ok(id)
    }

    /// Makes `source` depend on `dest`. Fails with `AlreadyStarted` once
    /// `source` has begun executing. Returns `false` if the edge existed.
    pub fn add_virtual_edge(&mut self, source: NodeId, dest: NodeId) -> Result<bool, GraphError> {
        let node = self
            .nodes
            .get(&source)
            .ok_or(GraphError::NodeNotFound { id: source })?;
        if node.started() {
            return Err(GraphError::AlreadyStarted { id: source });
        }
        if !self.nodes.contains_key(&dest) {
            return Err(GraphError::NodeNotFound { id: dest });
        }
        if !self.topology.add_edge(source, dest) {
            return Ok(false);
        }
        topology::connect(&mut self.nodes, source, dest)?;
        Ok(true)
    }

    /// Removes a node nothing but the root depends on, with its edges and
    /// channels. Former dependencies left without a dependent, and not yet
    /// finished, are hung under the root.
    pub fn remove_virtual_node(&mut self, id: NodeId) -> Result<GraphNode, GraphError> {
        if !self.nodes.contains_key(&id) {
            return Err(GraphError::NodeNotFound { id });
        }
        if self.root == Some(id) {
            return Err(GraphError::RootRemoval { id, vdg: self.id });
        }
        let blocking = self.blocking_dependents(id);
        if !blocking.is_empty() {
            return Err(GraphError::HasDependents {
                id,
                count: blocking.len(),
            });
        }

        let former: Vec<NodeId> = self.topology.dependencies(id).to_vec();
        for dependent in self.topology.dependents(id) {
            topology::disconnect(&mut self.nodes, dependent, id);
        }
        for &dependency in &former {
            topology::disconnect(&mut self.nodes, id, dependency);
        }
        self.topology.remove(id);
        let node = self
            .nodes
            .remove(&id)
            .ok_or(GraphError::NodeNotFound { id })?;

        if let Some(space) = node.space() {
            if !self.nodes.values().any(|n| n.space() == Some(space)) {
                self.space.shift_remove(&space);
            }
        }

        if let Some(root) = self.root {
            for dependency in former {
                let orphaned = self.topology.is_root_boundary(dependency)
                    && self.nodes.get(&dependency).is_some_and(|n| !n.finished());
                if orphaned {
                    self.add_virtual_edge(root, dependency)?;
                }
            }
        }

        tracing::debug!(vdg = %self.id, node = %id, "removed virtual node");
        Ok(node)
    }

    /// Marks `id` started and tells its dependents. From here on its
    /// dependency list cannot grow.
    pub fn start(&mut self, id: NodeId) -> Result<(), GraphError> {
        let node = self.nodes.get(&id).ok_or(GraphError::NodeNotFound { id })?;
        if node.started() {
            return Err(GraphError::AlreadyStarted { id });
        }
        self.set_state(id, VirtualState::Started)?;
        self.announce(id, SignalValue::Started)?;
        Ok(())
    }

    /// Every dependency has reported a terminal signal.
    pub fn mark_unblocked(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.set_state(id, VirtualState::Unblocked)
    }

    /// Records that `id` committed or rolled back. The node stays until
    /// removed or swept.
    pub fn mark_finished(&mut self, id: NodeId, committed: bool) -> Result<(), GraphError> {
        let state = if committed {
            VirtualState::Committed
        } else {
            VirtualState::RolledBack
        };
        self.set_state(id, state)
    }

    pub(crate) fn set_state(&mut self, id: NodeId, state: VirtualState) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(GraphError::NodeNotFound { id })?;
        node.set_state(state);
        Ok(())
    }

    /// Removes finished nodes that nothing but the root depends on, until no
    /// more can go. Returns the removed ids in removal order.
    pub fn sweep_finished(&mut self) -> Vec<NodeId> {
        let mut swept = Vec::new();
        loop {
            let ready: Vec<NodeId> = self
                .topology
                .ids()
                .filter(|&id| self.nodes.get(&id).is_some_and(|n| n.finished()))
                .filter(|&id| self.blocking_dependents(id).is_empty())
                .collect();
            if ready.is_empty() {
                break;
            }
            for id in ready {
                if self.remove_virtual_node(id).is_ok() {
                    swept.push(id);
                }
            }
        }
        swept
    }

    /// Broadcasts `value` from `id`, tagged with its lead procedure.
    pub fn announce(&self, id: NodeId, value: SignalValue) -> Result<usize, GraphError> {
        let node = self.nodes.get(&id).ok_or(GraphError::NodeNotFound { id })?;
        let procedure = node.lead_procedure().unwrap_or(ProcedureId(0));
        Ok(node.signal(progress_signal(procedure, node, value)))
    }

    pub fn signal(&self, id: NodeId, signal: NodeSignal) -> Result<usize, GraphError> {
        let node = self.nodes.get(&id).ok_or(GraphError::NodeNotFound { id })?;
        Ok(node.signal(signal))
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

    /// Operation ids in insertion order, root excluded.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        let root = self.root;
        self.topology.ids().filter(move |&id| Some(id) != root)
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

    /// Dependents other than the root.
    fn blocking_dependents(&self, id: NodeId) -> Vec<NodeId> {
        let mut dependents = self.topology.dependents(id);
        dependents.retain(|&d| Some(d) != self.root);
        dependents
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

    /// Handles on node `id`'s dependency channels.
    pub fn inboxes(&self, id: NodeId) -> Result<Vec<SignalInbox>, GraphError> {
        let node = self.nodes.get(&id).ok_or(GraphError::NodeNotFound { id })?;
        Ok(node.signals().values().cloned().collect())
    }
}
