//! Dependency-graph nodes.
//!
//! Every node shares a base record (identity, priority, permitted procedures
//! and its two signal maps) and carries one [`NodeKind`]:
//!
//! - **UI**: a permanent spatial access point bound to a [`Section`].
//!   A *virtual* UI (VUI) is a UI with a lifespan shorter than its dependents.
//! - **Temporal**: a successor addressing the same space as its root UI, for
//!   threads that visit a region after the UI's own thread.
//! - **Virtual**: a short-lived operation that only ever lives in a VDG.

use serde::{Deserialize, Serialize};

use crate::access::ProcedureList;
use crate::id::{NodeId, ProcedureId};
use crate::section::Section;
use crate::signal::{self, NodeSignal, SignalInbox, SignalPort, SignalingMap, SignalsMap};

/// Tag describing what a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Ui,
    Temporal,
    VirtualTemporal,
    VirtualUi,
    VdgNode,
    /// Never produced by a constructed node; decoding fallback for foreign
    /// tags.
    #[serde(other)]
    Unknown,
}

/// Lifecycle of a virtual node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VirtualState {
    Created,
    /// Ordered into a VDG.
    Waiting,
    Started,
    /// Every dependency has signaled a terminal value.
    Unblocked,
    Committed,
    RolledBack,
}

impl VirtualState {
    /// Once started, a node's dependency list is frozen.
    pub fn has_started(self) -> bool {
        !matches!(self, VirtualState::Created | VirtualState::Waiting)
    }

    pub fn is_finished(self) -> bool {
        matches!(self, VirtualState::Committed | VirtualState::RolledBack)
    }
}

/// The closed set of node variants.
#[derive(Debug)]
pub enum NodeKind {
    Ui {
        section: Box<dyn Section>,
        /// Strictly unique: no other UI may address any of its elements.
        unique: bool,
        is_virtual: bool,
    },
    Temporal {
        root: NodeId,
        is_virtual: bool,
    },
    Virtual {
        /// The (V)UI the operation acts on. `None` for a VDG root.
        subspace: Option<NodeId>,
        is_root: bool,
        state: VirtualState,
    },
}

/// A node of a permanent graph or a VDG.
#[derive(Debug)]
pub struct GraphNode {
    id: NodeId,
    priority: i32,
    procedures: ProcedureList,
    signalers: SignalingMap,
    signals: SignalsMap,
    kind: NodeKind,
}

impl GraphNode {
    fn with_kind(id: NodeId, kind: NodeKind) -> Self {
        GraphNode {
            id,
            priority: 0,
            procedures: Vec::new(),
            signalers: SignalingMap::new(),
            signals: SignalsMap::new(),
            kind,
        }
    }

    /// A permanent UI over `section`.
    pub fn ui(id: NodeId, section: impl Section + 'static) -> Self {
        Self::with_kind(
            id,
            NodeKind::Ui {
                section: Box::new(section),
                unique: false,
                is_virtual: false,
            },
        )
    }

    /// A virtual UI over `section`.
    pub fn virtual_ui(id: NodeId, section: impl Section + 'static) -> Self {
        Self::virtual_ui_boxed(id, Box::new(section))
    }

    pub fn virtual_ui_boxed(id: NodeId, section: Box<dyn Section>) -> Self {
        Self::with_kind(
            id,
            NodeKind::Ui {
                section,
                unique: false,
                is_virtual: true,
            },
        )
    }

    /// A temporal successor of the UI `root`.
    pub fn temporal(id: NodeId, root: NodeId) -> Self {
        Self::with_kind(
            id,
            NodeKind::Temporal {
                root,
                is_virtual: false,
            },
        )
    }

    /// A temporarily spawned temporal node.
    pub fn virtual_temporal(id: NodeId, root: NodeId) -> Self {
        Self::with_kind(
            id,
            NodeKind::Temporal {
                root,
                is_virtual: true,
            },
        )
    }

    /// A VDG operation acting on `subspace`. Its priority is the lead
    /// priority of `procedures`.
    pub fn virtual_op(id: NodeId, subspace: Option<NodeId>, procedures: ProcedureList) -> Self {
        let priority = crate::access::lead_priority(&procedures);
        let mut node = Self::with_kind(
            id,
            NodeKind::Virtual {
                subspace,
                is_root: false,
                state: VirtualState::Created,
            },
        );
        node.priority = priority;
        node.procedures = procedures;
        node
    }

    /// The synthetic root of a VDG.
    pub fn vdg_root(id: NodeId) -> Self {
        Self::with_kind(
            id,
            NodeKind::Virtual {
                subspace: None,
                is_root: true,
                state: VirtualState::Created,
            },
        )
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_procedures(mut self, procedures: ProcedureList) -> Self {
        self.procedures = procedures;
        self
    }

    /// Marks a UI as strictly unique. No effect on other kinds.
    pub fn with_unique(mut self, strict: bool) -> Self {
        if let NodeKind::Ui { unique, .. } = &mut self.kind {
            *unique = strict;
        }
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn procedures(&self) -> &ProcedureList {
        &self.procedures
    }

    /// The first permitted procedure; the one lifecycle signals are tagged
    /// with.
    pub fn lead_procedure(&self) -> Option<ProcedureId> {
        self.procedures.first().map(|p| p.id())
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn node_type(&self) -> NodeType {
        match &self.kind {
            NodeKind::Ui {
                is_virtual: false, ..
            } => NodeType::Ui,
            NodeKind::Ui {
                is_virtual: true, ..
            } => NodeType::VirtualUi,
            NodeKind::Temporal {
                is_virtual: false, ..
            } => NodeType::Temporal,
            NodeKind::Temporal {
                is_virtual: true, ..
            } => NodeType::VirtualTemporal,
            NodeKind::Virtual { .. } => NodeType::VdgNode,
        }
    }

    pub fn is_virtual(&self) -> bool {
        match &self.kind {
            NodeKind::Ui { is_virtual, .. } | NodeKind::Temporal { is_virtual, .. } => *is_virtual,
            NodeKind::Virtual { .. } => true,
        }
    }

    /// True for VDG nodes (as opposed to VUIs and virtual temporals, which
    /// live in the permanent graph).
    pub fn is_vdg_node(&self) -> bool {
        matches!(self.kind, NodeKind::Virtual { .. })
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, NodeKind::Virtual { is_root: true, .. })
    }

    pub fn is_unique(&self) -> bool {
        matches!(self.kind, NodeKind::Ui { unique: true, .. })
    }

    /// Lifecycle state of a VDG node, `None` for permanent nodes.
    pub fn state(&self) -> Option<VirtualState> {
        match self.kind {
            NodeKind::Virtual { state, .. } => Some(state),
            _ => None,
        }
    }

    pub fn started(&self) -> bool {
        self.state().is_some_and(VirtualState::has_started)
    }

    pub fn finished(&self) -> bool {
        self.state().is_some_and(VirtualState::is_finished)
    }

    /// The (V)UI this node's signals pertain to.
    pub fn space(&self) -> Option<NodeId> {
        match self.kind {
            NodeKind::Ui { .. } => Some(self.id),
            NodeKind::Temporal { root, .. } => Some(root),
            NodeKind::Virtual { subspace, .. } => subspace,
        }
    }

    pub fn section(&self) -> Option<&dyn Section> {
        match &self.kind {
            NodeKind::Ui { section, .. } => Some(section.as_ref()),
            _ => None,
        }
    }

    pub fn section_mut(&mut self) -> Option<&mut (dyn Section + 'static)> {
        match &mut self.kind {
            NodeKind::Ui { section, .. } => Some(section.as_mut()),
            _ => None,
        }
    }

    /// Whether `procedure` is one this node may run.
    pub fn allows(&self, procedure: ProcedureId) -> bool {
        self.procedures.iter().any(|p| p.id() == procedure)
    }

    /// Dependent id -> send side.
    pub fn signalers(&self) -> &SignalingMap {
        &self.signalers
    }

    /// Dependency id -> receive side.
    pub fn signals(&self) -> &SignalsMap {
        &self.signals
    }

    /// Broadcasts to every dependent. Returns how many received it.
    pub fn signal(&self, value: NodeSignal) -> usize {
        signal::broadcast(&self.signalers, value)
    }

    pub(crate) fn set_state(&mut self, next: VirtualState) {
        if let NodeKind::Virtual { state, .. } = &mut self.kind {
            *state = next;
        }
    }

    pub(crate) fn connect_dependent(&mut self, dependent: NodeId, port: SignalPort) {
        self.signalers.insert(dependent, port);
    }

    pub(crate) fn connect_dependency(&mut self, dependency: NodeId, inbox: SignalInbox) {
        self.signals.insert(dependency, inbox);
    }

    pub(crate) fn disconnect_dependent(&mut self, dependent: NodeId) -> Option<SignalPort> {
        self.signalers.remove(&dependent)
    }

    pub(crate) fn disconnect_dependency(&mut self, dependency: NodeId) -> Option<SignalInbox> {
        self.signals.remove(&dependency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ElementId;
    use crate::section::SectionView;

    fn section() -> SectionView {
        SectionView::disjoint([ElementId(1)], [])
    }

    #[test]
    fn node_types() {
        assert_eq!(GraphNode::ui(NodeId(1), section()).node_type(), NodeType::Ui);
        assert_eq!(
            GraphNode::virtual_ui(NodeId(1), section()).node_type(),
            NodeType::VirtualUi
        );
        assert_eq!(
            GraphNode::temporal(NodeId(2), NodeId(1)).node_type(),
            NodeType::Temporal
        );
        assert_eq!(
            GraphNode::virtual_temporal(NodeId(2), NodeId(1)).node_type(),
            NodeType::VirtualTemporal
        );
        assert_eq!(GraphNode::vdg_root(NodeId(3)).node_type(), NodeType::VdgNode);
    }

    #[test]
    fn space_follows_kind() {
        assert_eq!(GraphNode::ui(NodeId(1), section()).space(), Some(NodeId(1)));
        assert_eq!(GraphNode::temporal(NodeId(2), NodeId(1)).space(), Some(NodeId(1)));
        assert_eq!(
            GraphNode::virtual_op(NodeId(3), Some(NodeId(9)), Vec::new()).space(),
            Some(NodeId(9))
        );
        assert_eq!(GraphNode::vdg_root(NodeId(4)).space(), None);
    }

    #[test]
    fn virtual_flags() {
        assert!(!GraphNode::ui(NodeId(1), section()).is_virtual());
        assert!(GraphNode::virtual_ui(NodeId(1), section()).is_virtual());
        assert!(GraphNode::vdg_root(NodeId(1)).is_virtual());
        assert!(GraphNode::vdg_root(NodeId(1)).is_root());
        assert!(!GraphNode::virtual_ui(NodeId(1), section()).is_vdg_node());
    }

    #[test]
    fn lifecycle_state() {
        let mut node = GraphNode::virtual_op(NodeId(1), None, Vec::new());
        assert_eq!(node.state(), Some(VirtualState::Created));
        assert!(!node.started());
        node.set_state(VirtualState::Started);
        assert!(node.started());
        assert!(!node.finished());
        node.set_state(VirtualState::RolledBack);
        assert!(node.finished());
        assert_eq!(GraphNode::temporal(NodeId(2), NodeId(1)).state(), None);
    }

    #[test]
    fn unknown_tag_decodes() {
        let tag: NodeType = serde_json::from_str("\"Hyperedge\"").unwrap();
        assert_eq!(tag, NodeType::Unknown);
    }
}
