//! Coordinator error types.
//!
//! [`CoordinatorError`] is the one error callers of [`crate::Coordinator`]
//! see. Structural failures from the graphs and failures of access
//! procedures pass through unchanged; lookups of sessions and tickets that
//! do not exist surface here as `NotFound`.

use std::time::Duration;

use fabric_core::{AccessError, GraphError, NodeId};

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// A session or operation lookup missed.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The configured wait on dependencies elapsed.
    #[error("node {node} gave up waiting on its dependencies after {after:?}")]
    WaitTimedOut { node: NodeId, after: Duration },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Access(#[from] AccessError),
}

impl CoordinatorError {
    pub(crate) fn session(id: impl ToString) -> Self {
        CoordinatorError::NotFound {
            kind: "session",
            id: id.to_string(),
        }
    }

    pub(crate) fn operation(id: NodeId) -> Self {
        CoordinatorError::NotFound {
            kind: "operation",
            id: id.to_string(),
        }
    }
}
