//! The `check` and `simulate` workloads.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use tokio::task::JoinSet;

use fabric_core::{
    DependencyGraph, ElementId, GraphError, GraphNode, NodeId, SectionView, TotalityConflict,
};
use fabric_sync::{Coordinator, CoordinatorConfig, CoordinatorError, ExecutionReport};

use crate::ops::{self, Applied, TreeOp};
use crate::tree::{SharedTree, Tree};

/// The permanent nodes owning one branch of the tree.
#[derive(Debug, Clone, Copy)]
pub struct BranchUi {
    pub top: ElementId,
    pub ui: NodeId,
    pub temporal: NodeId,
}

/// Builds the permanent graph: a UI for the tree root, and per branch a UI
/// plus a temporal node that waits on it.
pub fn build_graph(
    tree: &SharedTree,
    tops: &[ElementId],
) -> Result<(DependencyGraph, Vec<BranchUi>), GraphError> {
    let mut graph = DependencyGraph::with_data_structure(Arc::new(tree.clone()));
    let snapshot = tree.lock();

    let trunk = graph.generate_id();
    graph.add_real_node(GraphNode::ui(
        trunk,
        SectionView::subset([snapshot.root()], &*snapshot),
    ))?;

    let mut branches = Vec::with_capacity(tops.len());
    for &top in tops {
        let ui = graph.generate_id();
        graph.add_real_node(GraphNode::ui(ui, SectionView::branch(top, &*snapshot)))?;
        let temporal = graph.generate_id();
        graph.add_real_node(GraphNode::temporal(temporal, ui))?;
        graph.add_edge(temporal, ui)?;
        branches.push(BranchUi { top, ui, temporal });
    }
    Ok((graph, branches))
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub tree_nodes: usize,
    pub tree_edges: usize,
    pub graph_nodes: usize,
    pub cycle: bool,
    pub totality_unique: bool,
    pub conflicts: Vec<TotalityConflict>,
    pub covered: bool,
    /// Dependencies first; absent when the graph has a cycle.
    pub order: Option<Vec<NodeId>>,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        !self.cycle && self.totality_unique && self.covered
    }
}

/// Verifies the permanent graph. Locks the tree, so the caller must not
/// hold it.
pub fn verify(graph: &DependencyGraph, tree: &SharedTree) -> CheckReport {
    let (tree_nodes, tree_edges) = {
        let tree = tree.lock();
        (tree.node_count(), tree.edge_count())
    };
    CheckReport {
        tree_nodes,
        tree_edges,
        graph_nodes: graph.len(),
        cycle: graph.cycle_detect(),
        totality_unique: graph.totality_unique(),
        conflicts: graph.totality_conflicts(),
        covered: graph.covered(),
        order: graph.topological_order().ok(),
    }
}

pub fn check(branches: usize, depth: usize) -> Result<CheckReport, GraphError> {
    let (tree, tops) = Tree::grow(branches, depth);
    let tree = SharedTree::new(tree);
    let (graph, _) = build_graph(&tree, &tops)?;
    Ok(verify(&graph, &tree))
}

// ---------------------------------------------------------------------------
// simulate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub sessions: usize,
    pub ops: usize,
    pub branches: usize,
    pub depth: usize,
    /// Every k-th operation of a session fails after mutating.
    pub fail_every: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub name: String,
    pub branch: ElementId,
    pub committed: usize,
    pub rolled_back: usize,
    pub errors: usize,
    /// Operations that saw at least one aborted dependency.
    pub saw_aborts: usize,
    pub by_op: BTreeMap<TreeOp, usize>,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub sessions: Vec<SessionSummary>,
    pub check: CheckReport,
}

impl SimulationReport {
    pub fn passed(&self) -> bool {
        self.check.passed() && self.sessions.iter().all(|s| s.errors == 0)
    }
}

pub async fn simulate(
    options: &SimulateOptions,
    config: CoordinatorConfig,
) -> Result<SimulationReport, CoordinatorError> {
    let (tree, tops) = Tree::grow(options.branches.max(1), options.depth.max(1));
    let tree = SharedTree::new(tree);
    let (graph, branches) = build_graph(&tree, &tops)?;
    let coordinator = Coordinator::new(graph, config);

    let mut tasks = JoinSet::new();
    for index in 0..options.sessions {
        let branch = branches[index % branches.len()];
        tasks.spawn(run_session(
            coordinator.clone(),
            tree.clone(),
            index,
            branch,
            options.ops,
            options.fail_every,
        ));
    }

    let mut sessions = Vec::with_capacity(options.sessions);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(summary) => sessions.push(summary?),
            Err(err) => tracing::error!("session task failed: {}", err),
        }
    }
    sessions.sort_by(|a, b| a.name.cmp(&b.name));

    let graph = coordinator.graph();
    let graph = graph.read().await;
    Ok(SimulationReport {
        sessions,
        check: verify(&graph, &tree),
    })
}

async fn run_session(
    coordinator: Coordinator,
    tree: SharedTree,
    index: usize,
    branch: BranchUi,
    count: usize,
    fail_every: Option<usize>,
) -> Result<SessionSummary, CoordinatorError> {
    let name = format!("session-{index:03}");
    let section = SectionView::branch(branch.top, &*tree.lock());
    let session = coordinator.open_session(Some(name.clone()), section).await?;

    let plan: Vec<TreeOp> = {
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|_| TreeOp::ALL[rng.gen_range(0..TreeOp::ALL.len())])
            .collect()
    };

    let mut tickets = Vec::with_capacity(plan.len());
    for op in plan {
        tickets.push((op, coordinator.submit(session, ops::procedures(op, &tree)).await?));
    }

    let mut running = JoinSet::new();
    for (i, (op, ticket)) in tickets.into_iter().enumerate() {
        let coordinator = coordinator.clone();
        let tree = tree.clone();
        let fail = fail_every.is_some_and(|k| k > 0 && (i + 1) % k == 0);
        running.spawn(async move {
            let mut applied = None;
            let result = coordinator
                .execute(&ticket, || {
                    let mut tree = tree.lock();
                    let mut rng = rand::thread_rng();
                    ops::apply(op, &mut tree, branch.top, &mut rng, fail).map(|a| {
                        applied = Some(a);
                    })
                })
                .await;
            (op, result, applied)
        });
    }

    let mut summary = SessionSummary {
        name,
        branch: branch.top,
        committed: 0,
        rolled_back: 0,
        errors: 0,
        saw_aborts: 0,
        by_op: BTreeMap::new(),
    };
    while let Some(joined) = running.join_next().await {
        let Ok((op, result, applied)) = joined else {
            summary.errors += 1;
            continue;
        };
        match result {
            Ok(report) => record(&coordinator, branch, &mut summary, op, report, applied).await,
            Err(err) => {
                tracing::warn!(%session, op = op.name(), "operation failed: {}", err);
                summary.errors += 1;
            }
        }
    }

    coordinator.close_session(session).await?;
    Ok(summary)
}

async fn record(
    coordinator: &Coordinator,
    branch: BranchUi,
    summary: &mut SessionSummary,
    op: TreeOp,
    report: ExecutionReport,
    applied: Option<Applied>,
) {
    if !report.upstream.aborted().is_empty() {
        summary.saw_aborts += 1;
    }
    if !report.committed {
        tracing::debug!(node = %report.node, reason = ?report.failure, "rolled back");
        summary.rolled_back += 1;
        return;
    }
    summary.committed += 1;
    *summary.by_op.entry(op).or_default() += 1;

    match &applied {
        Some(Applied::Read { node, value }) => tracing::debug!(%node, %value, "read"),
        Some(Applied::Updated { node }) => tracing::debug!(%node, "updated"),
        _ => {}
    }

    // Keep the owning UI's section in step with the tree.
    if let Some(applied) = applied {
        let graph = coordinator.graph();
        let mut graph = graph.write().await;
        if let Some(section) = graph.section_mut(branch.ui) {
            applied.update_section(section);
        }
    }
}
