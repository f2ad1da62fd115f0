//! The access-procedure contract.
//!
//! An access procedure is any unit of work that reads or mutates the data
//! structure. The graph never looks inside one: it only needs a stable id to
//! tag signals with, a priority to order by, and the two transaction
//! primitives. Commit runs after the work has mutated the data structure and
//! announces completion to dependents; rollback runs instead of commit and
//! overwrites the touched elements with their saved state.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cds::{CdsEdge, CdsNode};
use crate::error::AccessError;
use crate::id::ProcedureId;
use crate::node::GraphNode;
use crate::signal::{NodeSignal, SignalValue};

/// The procedures a node is permitted to run.
pub type ProcedureList = Vec<Arc<dyn AccessProcedure>>;

/// Pre-mutation state of a data-structure node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node: CdsNode,
    pub state: serde_json::Value,
}

/// Pre-mutation state of a data-structure edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    pub edge: CdsEdge,
    pub state: serde_json::Value,
}

/// Implemented by every operation that participates in ordering.
pub trait AccessProcedure: fmt::Debug + Send + Sync {
    /// Stable per procedure definition.
    fn id(&self) -> ProcedureId;

    /// The class of action, for diagnostics.
    fn name(&self) -> &str {
        "procedure"
    }

    /// Lower values must complete first.
    fn priority(&self) -> i32;

    /// Announces that the procedure's mutation succeeded by broadcasting
    /// `Completed`, tagged with this procedure and the node's space, to every
    /// dependent of `node`.
    fn commit(&self, node: &GraphNode) -> Result<(), AccessError> {
        if !node.allows(self.id()) {
            return Err(AccessError::NotPermitted {
                procedure: self.id(),
                node: node.id(),
            });
        }
        node.signal(progress_signal(self.id(), node, SignalValue::Completed));
        Ok(())
    }

    /// Restores every touched element from its snapshot.
    fn rollback(&self, nodes: &[NodeSnapshot], edges: &[EdgeSnapshot]) -> Result<(), AccessError>;
}

/// Builds the signal `node` sends to report `value` for `procedure`.
pub fn progress_signal(procedure: ProcedureId, node: &GraphNode, value: SignalValue) -> NodeSignal {
    NodeSignal {
        procedure,
        value,
        space: node.space(),
        origin: node.id(),
    }
}

/// The effective priority of a node running several procedures: the most
/// urgent (lowest) one. Zero for an empty list.
pub fn lead_priority(procedures: &[Arc<dyn AccessProcedure>]) -> i32 {
    procedures.iter().map(|p| p.priority()).min().unwrap_or(0)
}
