//! Core error types for fabric-core.
//!
//! Uses `thiserror` for structured, matchable error variants. Every
//! structural-invariant violation is returned to the immediate caller; the
//! core never retries and never rolls back a partially applied mutation.

use thiserror::Error;

use crate::id::{NodeId, ProcedureId, VdgId};
use crate::node::NodeType;

/// Structural errors produced by the permanent graph and by VDGs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A node with the same identity is already part of the graph.
    #[error("duplicate node: NodeId({id})", id = id.0)]
    DuplicateNode { id: NodeId },

    /// An operation that needs a virtual node was given a non-virtual one.
    #[error("not a virtual node: NodeId({id}) is {node_type:?}", id = id.0)]
    NotVirtual { id: NodeId, node_type: NodeType },

    /// Removal attempted while the node still depends on other nodes.
    #[error("node {id} still has {count} dependencies")]
    HasDependencies { id: NodeId, count: usize },

    /// Removal attempted while other nodes still depend on this one.
    #[error("node {id} still has {count} dependents")]
    HasDependents { id: NodeId, count: usize },

    /// A dependency cannot be added to a node that has begun executing.
    #[error("node {id} has already started")]
    AlreadyStarted { id: NodeId },

    /// A node id was not found in the graph.
    #[error("node not found: NodeId({id})", id = id.0)]
    NodeNotFound { id: NodeId },

    /// A node was offered to the wrong kind of graph (a VDG node to the
    /// permanent graph, or a permanent node to a VDG).
    #[error("node {id} of type {node_type:?} does not belong in this graph")]
    WrongGraph { id: NodeId, node_type: NodeType },

    /// A root-relative operation was attempted on an unrooted VDG.
    #[error("VDG {vdg} has no root node")]
    NoRoot { vdg: VdgId },

    /// The root of a VDG leaves only when the VDG is closed.
    #[error("node {id} is the root of VDG {vdg}")]
    RootRemoval { id: NodeId, vdg: VdgId },

    /// A VDG cannot be closed while operations remain in it.
    #[error("VDG {vdg} still holds {remaining} virtual nodes")]
    VdgNotEmpty { vdg: VdgId, remaining: usize },

    /// The topology is not acyclic.
    #[error("dependency cycle detected")]
    CycleDetected,
}

/// Errors returned by access procedures.
///
/// Never retried by the core: retry and backoff are the caller's policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("commit of procedure {procedure} failed: {reason}")]
    CommitFailed { procedure: ProcedureId, reason: String },

    #[error("rollback of procedure {procedure} failed: {reason}")]
    RollbackFailed { procedure: ProcedureId, reason: String },

    /// The node is not permitted to run this procedure.
    #[error("procedure {procedure} is not permitted on node {node}")]
    NotPermitted { procedure: ProcedureId, node: NodeId },
}

/// Errors from the signaling transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    /// The receiving side of the channel has been dropped.
    #[error("signal channel to node {dependent} is disconnected")]
    Disconnected { dependent: NodeId },
}
