//! The caller-facing coordinator.
//!
//! [`Coordinator`] drives the full life of an operation: a session orders it
//! into its VDG ([`Coordinator::submit`]), then [`Coordinator::execute`]
//! starts it, blocks until its dependencies report a terminal signal, runs
//! the caller's work and either commits every procedure or rolls every one
//! back. Finished operations are swept as soon as nothing waits on them.
//!
//! Locking: the permanent graph sits behind one `RwLock`, each session's VDG
//! behind its own `Mutex`. Neither lock is held while waiting on signals or
//! running work; channels are never locked.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use fabric_core::{
    block_on_dependencies, AccessError, DependencyGraph, EdgeSnapshot, GraphError, GraphNode,
    NodeId, NodeSnapshot, Placement, Poset, ProcedureId, ProcedureList, Section, SignalInbox,
    SignalValue, Vdg, WaitOutcome,
};

use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;
use crate::session::{Session, SessionId, SessionRegistry};

/// A submitted operation, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub session: SessionId,
    pub node: NodeId,
    pub priority: i32,
    pub placement: Placement,
}

/// Why an operation's work failed, with the pre-mutation state of everything
/// it touched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkFailure {
    pub reason: String,
    pub nodes: Vec<NodeSnapshot>,
    pub edges: Vec<EdgeSnapshot>,
}

impl WorkFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        WorkFailure {
            reason: reason.into(),
            ..Self::default()
        }
    }

    pub fn with_snapshots(mut self, nodes: Vec<NodeSnapshot>, edges: Vec<EdgeSnapshot>) -> Self {
        self.nodes = nodes;
        self.edges = edges;
        self
    }
}

/// What happened to one executed operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub node: NodeId,
    /// `false` when the work failed and was rolled back.
    pub committed: bool,
    /// How each dependency released the wait.
    pub upstream: WaitOutcome,
    pub failure: Option<String>,
    /// Operations removed from the VDG after this one finished.
    pub swept: Vec<NodeId>,
}

/// Shared coordinator state. Cloning shares the same graph and sessions.
#[derive(Clone)]
pub struct Coordinator {
    graph: Arc<RwLock<DependencyGraph>>,
    sessions: Arc<SessionRegistry>,
    config: CoordinatorConfig,
    poset: Poset,
}

impl Coordinator {
    pub fn new(graph: DependencyGraph, config: CoordinatorConfig) -> Self {
        let poset = Poset::new(config.ordering);
        Coordinator {
            graph: Arc::new(RwLock::new(graph)),
            sessions: Arc::new(SessionRegistry::new()),
            config,
            poset,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// The permanent graph, for adding UIs and edges directly.
    pub fn graph(&self) -> Arc<RwLock<DependencyGraph>> {
        Arc::clone(&self.graph)
    }

    fn session(&self, id: SessionId) -> Result<Session, CoordinatorError> {
        self.sessions.get(&id).ok_or_else(|| CoordinatorError::session(id))
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Creates a virtual UI over `section` and a rooted VDG for it.
    pub async fn open_session(
        &self,
        name: Option<String>,
        section: impl Section + 'static,
    ) -> Result<SessionId, CoordinatorError> {
        let (vui, vdg) = {
            let mut graph = self.graph.write().await;
            let vui = graph.generate_id();
            graph.add_virtual_ui(GraphNode::virtual_ui(vui, section))?;
            (vui, Vdg::with_root(&mut graph))
        };
        let vdg_id = vdg.id();
        let id = self.sessions.register(name, vui, vdg);
        tracing::info!(session = %id, %vui, vdg = %vdg_id, "opened session");
        Ok(id)
    }

    /// Waits for every outstanding operation of the session, then removes
    /// its VDG and virtual UI.
    pub async fn close_session(&self, id: SessionId) -> Result<WaitOutcome, CoordinatorError> {
        let session = self.session(id)?;
        let (root, inboxes) = {
            let vdg = session.vdg.lock().await;
            let root = vdg.root().ok_or(GraphError::NoRoot { vdg: vdg.id() })?;
            (root, vdg.inboxes(root)?)
        };

        let outcome = self.wait(root, inboxes).await?;

        let mut vdg = session.vdg.lock().await;
        vdg.sweep_finished();
        let mut graph = self.graph.write().await;
        vdg.close(&mut graph)?;
        graph.remove_virtual_ui(session.vui)?;
        self.sessions.deregister(&id);
        tracing::info!(session = %id, "closed session");
        Ok(outcome)
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.list()
    }

    pub fn touch(&self, id: SessionId) {
        self.sessions.touch(&id);
    }

    /// Closes every session idle for at least `timeout`. Returns the ids
    /// closed; sessions that fail to close stay open.
    pub async fn sweep_inactive(&self, timeout: Duration) -> Vec<SessionId> {
        let mut closed = Vec::new();
        for id in self.sessions.idle(timeout) {
            match self.close_session(id).await {
                Ok(_) => closed.push(id),
                Err(err) => tracing::warn!(session = %id, "idle session not closed: {}", err),
            }
        }
        closed
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Orders a new operation running `procedures` into the session's VDG.
    pub async fn submit(
        &self,
        session: SessionId,
        procedures: ProcedureList,
    ) -> Result<Ticket, CoordinatorError> {
        let entry = self.session(session)?;
        self.sessions.touch(&session);

        let mut vdg = entry.vdg.lock().await;
        let id = vdg.generate_id();
        let node = GraphNode::virtual_op(id, Some(entry.vui), procedures);
        let priority = node.priority();
        let placement = self.poset.order(&mut vdg, node)?;
        Ok(Ticket {
            session,
            node: id,
            priority,
            placement,
        })
    }

    /// Runs a submitted operation once its dependencies have finished.
    ///
    /// On success every procedure commits and the operation then signals
    /// `Completed` once. When `work` fails every procedure rolls back from
    /// its snapshots and the operation signals `Aborted`. A failed commit or
    /// a failed rollback leaves effects applied, so it signals `PartialAbort`
    /// and is returned, never retried.
    pub async fn execute<F>(&self, ticket: &Ticket, work: F) -> Result<ExecutionReport, CoordinatorError>
    where
        F: FnOnce() -> Result<(), WorkFailure> + Send,
    {
        let session = self.session(ticket.session)?;
        self.sessions.touch(&ticket.session);
        let node = ticket.node;

        let inboxes = {
            let mut vdg = session.vdg.lock().await;
            if !vdg.contains(node) {
                return Err(CoordinatorError::operation(node));
            }
            vdg.start(node)?;
            vdg.inboxes(node)?
        };

        let upstream = match self.wait(node, inboxes).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let mut vdg = session.vdg.lock().await;
                vdg.announce(node, SignalValue::Aborted)?;
                vdg.mark_finished(node, false)?;
                vdg.sweep_finished();
                return Err(err);
            }
        };
        if !upstream.aborted().is_empty() {
            tracing::warn!(%node, aborted = ?upstream.aborted(), "dependencies aborted");
        }
        session.vdg.lock().await.mark_unblocked(node)?;

        let result = work();

        let mut vdg = session.vdg.lock().await;
        let procedures = vdg
            .node(node)
            .map(|n| n.procedures().clone())
            .ok_or_else(|| CoordinatorError::operation(node))?;

        let (committed, failure) = match result {
            Ok(()) => {
                if let Err(err) = commit_all(&vdg, node, &procedures) {
                    tracing::warn!(%node, "commit failed: {}", err);
                    vdg.announce(node, SignalValue::PartialAbort)?;
                    vdg.mark_finished(node, false)?;
                    vdg.sweep_finished();
                    return Err(err.into());
                }
                vdg.announce(node, SignalValue::Completed)?;
                (true, None)
            }
            Err(failure) => {
                tracing::warn!(%node, reason = %failure.reason, "work failed, rolling back");
                if let Err(err) = rollback_all(&procedures, &failure) {
                    vdg.announce(node, SignalValue::PartialAbort)?;
                    vdg.mark_finished(node, false)?;
                    vdg.sweep_finished();
                    return Err(err.into());
                }
                vdg.announce(node, SignalValue::Aborted)?;
                (false, Some(failure.reason))
            }
        };

        vdg.mark_finished(node, committed)?;
        let swept = vdg.sweep_finished();
        tracing::debug!(%node, committed, swept = swept.len(), "operation finished");

        Ok(ExecutionReport {
            node,
            committed,
            upstream,
            failure,
            swept,
        })
    }

    /// Blocks until every dependency of permanent node `id` reports a
    /// terminal signal.
    pub async fn wait_for_node(&self, id: NodeId) -> Result<WaitOutcome, CoordinatorError> {
        let inboxes = self.graph.read().await.inboxes(id)?;
        self.wait(id, inboxes).await
    }

    async fn wait(
        &self,
        node: NodeId,
        inboxes: Vec<SignalInbox>,
    ) -> Result<WaitOutcome, CoordinatorError> {
        let blocked = block_on_dependencies(inboxes, self.config.abort_retry);
        match self.config.wait_timeout {
            Some(after) => tokio::time::timeout(after, blocked)
                .await
                .map_err(|_| CoordinatorError::WaitTimedOut { node, after }),
            None => Ok(blocked.await),
        }
    }
}

/// Commits every procedure against a channel-less copy of the operation.
/// Dependents hear nothing until the caller announces the outcome.
fn commit_all(vdg: &Vdg, node: NodeId, procedures: &ProcedureList) -> Result<(), AccessError> {
    let target = vdg.node(node).ok_or(AccessError::CommitFailed {
        procedure: ProcedureId(0),
        reason: format!("operation {node} left its VDG"),
    })?;
    let staged = GraphNode::virtual_op(node, target.space(), procedures.clone());
    for procedure in procedures {
        procedure.commit(&staged)?;
    }
    Ok(())
}

fn rollback_all(procedures: &ProcedureList, failure: &WorkFailure) -> Result<(), AccessError> {
    for procedure in procedures {
        procedure.rollback(&failure.nodes, &failure.edges)?;
    }
    Ok(())
}
