//! Tree operations as access procedures.
//!
//! Deletes order first, then edge inserts, node inserts, reads and
//! updates.

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;

use fabric_core::{
    AccessError, AccessProcedure, CdsEdge, CdsNode, EdgeSnapshot, ElementId, NodeSnapshot,
    ProcedureId, ProcedureList, Section, SectionView,
};
use fabric_sync::WorkFailure;

use crate::tree::{SharedTree, Tree, TreeEdge, TreeNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TreeOp {
    AddNode,
    AddEdge,
    Delete,
    Read,
    Update,
}

impl TreeOp {
    pub const ALL: [TreeOp; 5] = [
        TreeOp::AddNode,
        TreeOp::AddEdge,
        TreeOp::Delete,
        TreeOp::Read,
        TreeOp::Update,
    ];

    pub fn id(self) -> ProcedureId {
        ProcedureId(match self {
            TreeOp::AddNode => 0,
            TreeOp::AddEdge => 1,
            TreeOp::Delete => 2,
            TreeOp::Read => 3,
            TreeOp::Update => 4,
        })
    }

    pub fn priority(self) -> i32 {
        match self {
            TreeOp::Delete => 1,
            TreeOp::AddEdge => 2,
            TreeOp::AddNode => 3,
            TreeOp::Read => 4,
            TreeOp::Update => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TreeOp::AddNode => "add-node",
            TreeOp::AddEdge => "add-edge",
            TreeOp::Delete => "delete",
            TreeOp::Read => "read",
            TreeOp::Update => "update",
        }
    }
}

// ---------------------------------------------------------------------------
// Procedure
// ---------------------------------------------------------------------------

/// One tree operation. Commit uses the default broadcast; rollback writes
/// snapshots back into the tree. A `null` snapshot state means the element
/// did not exist before the work ran.
#[derive(Debug)]
pub struct TreeProcedure {
    op: TreeOp,
    tree: SharedTree,
}

impl TreeProcedure {
    pub fn new(op: TreeOp, tree: SharedTree) -> Self {
        TreeProcedure { op, tree }
    }
}

impl AccessProcedure for TreeProcedure {
    fn id(&self) -> ProcedureId {
        self.op.id()
    }

    fn name(&self) -> &str {
        self.op.name()
    }

    fn priority(&self) -> i32 {
        self.op.priority()
    }

    fn rollback(&self, nodes: &[NodeSnapshot], edges: &[EdgeSnapshot]) -> Result<(), AccessError> {
        let mut tree = self.tree.lock();
        // Edges first so a restored node never dangles an edge removed below.
        for snapshot in edges {
            if snapshot.state.is_null() {
                tree.remove_edge(snapshot.edge.id);
            } else {
                tree.restore_edge(decode(self.id(), &snapshot.state)?);
            }
        }
        for snapshot in nodes {
            if snapshot.state.is_null() {
                tree.remove_node(snapshot.node.id);
            } else {
                tree.restore_node(decode(self.id(), &snapshot.state)?);
            }
        }
        Ok(())
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    procedure: ProcedureId,
    state: &Value,
) -> Result<T, AccessError> {
    serde_json::from_value(state.clone()).map_err(|e| AccessError::RollbackFailed {
        procedure,
        reason: e.to_string(),
    })
}

pub fn procedures(op: TreeOp, tree: &SharedTree) -> ProcedureList {
    vec![Arc::new(TreeProcedure::new(op, tree.clone()))]
}

// ---------------------------------------------------------------------------
// Work
// ---------------------------------------------------------------------------

/// The change a committed operation made, for keeping sections current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Added { node: ElementId, edge: ElementId },
    Linked { edge: ElementId },
    Removed { node: ElementId, edges: Vec<ElementId> },
    Read { node: ElementId, value: String },
    Updated { node: ElementId },
}

impl Applied {
    /// Brings `section` in line with the change.
    pub fn update_section(&self, section: &mut dyn Section) {
        match self {
            Applied::Added { node, edge } => {
                let mut nodes = section.list_nodes().clone();
                nodes.insert(*node);
                section.update_node_list(nodes);
                let mut list = section.list_edges().clone();
                list.insert(*edge);
                section.update_edge_list(list);
            }
            Applied::Linked { edge } => {
                let mut list = section.list_edges().clone();
                list.insert(*edge);
                section.update_edge_list(list);
            }
            Applied::Removed { node, edges } => {
                let mut nodes = section.list_nodes().clone();
                nodes.shift_remove(node);
                section.update_node_list(nodes);
                let mut list = section.list_edges().clone();
                for edge in edges {
                    list.shift_remove(edge);
                }
                section.update_edge_list(list);
            }
            Applied::Read { .. } | Applied::Updated { .. } => {}
        }
    }
}

fn node_snapshot(id: ElementId, before: Option<&TreeNode>) -> NodeSnapshot {
    NodeSnapshot {
        node: CdsNode { id, immutable: false },
        state: before
            .and_then(|n| serde_json::to_value(n).ok())
            .unwrap_or(Value::Null),
    }
}

fn edge_snapshot(edge: &TreeEdge, existed: bool) -> EdgeSnapshot {
    EdgeSnapshot {
        edge: CdsEdge {
            id: edge.id,
            immutable: false,
            source: edge.source,
            destination: edge.destination,
        },
        state: if existed {
            serde_json::to_value(edge).unwrap_or(Value::Null)
        } else {
            Value::Null
        },
    }
}

/// Runs `op` against a random element of the branch under `top`.
///
/// With `fail` set the mutation is still made, then reported as failed
/// together with the snapshots needed to undo it.
pub fn apply<R: Rng>(
    op: TreeOp,
    tree: &mut Tree,
    top: ElementId,
    rng: &mut R,
    fail: bool,
) -> Result<Applied, WorkFailure> {
    let reach: Vec<ElementId> = SectionView::branch(top, &*tree)
        .list_nodes()
        .iter()
        .copied()
        .collect();
    let Some(&target) = reach.choose(rng) else {
        return Err(WorkFailure::new(format!("branch {top} is gone")));
    };

    let (applied, nodes, edges) = match op {
        TreeOp::AddNode => {
            let value = format!("n{}", rng.gen::<u16>());
            let (node, edge) = tree
                .add_node(target, value)
                .ok_or_else(|| WorkFailure::new(format!("parent {target} missing")))?;
            let snapshot = tree.edge(edge).map(|e| edge_snapshot(e, false));
            (
                Applied::Added { node, edge },
                vec![node_snapshot(node, None)],
                snapshot.into_iter().collect(),
            )
        }
        TreeOp::AddEdge => {
            let Some(&destination) = reach.choose(rng) else {
                return Err(WorkFailure::new("no destination"));
            };
            let edge = tree
                .add_edge(target, destination)
                .ok_or_else(|| WorkFailure::new("endpoint missing"))?;
            let snapshot = tree.edge(edge).map(|e| edge_snapshot(e, false));
            (Applied::Linked { edge }, Vec::new(), snapshot.into_iter().collect())
        }
        TreeOp::Delete => {
            if target == top || !tree.children(target).is_empty() {
                return Err(WorkFailure::new(format!("{target} is not a removable leaf")));
            }
            let (node, removed) = tree
                .remove_node(target)
                .ok_or_else(|| WorkFailure::new(format!("{target} missing")))?;
            (
                Applied::Removed {
                    node: node.id,
                    edges: removed.iter().map(|e| e.id).collect(),
                },
                vec![node_snapshot(node.id, Some(&node))],
                removed.iter().map(|e| edge_snapshot(e, true)).collect(),
            )
        }
        TreeOp::Read => {
            let value = tree
                .node(target)
                .map(|n| n.value.clone())
                .ok_or_else(|| WorkFailure::new(format!("{target} missing")))?;
            (Applied::Read { node: target, value }, Vec::new(), Vec::new())
        }
        TreeOp::Update => {
            let before = tree.node(target).cloned();
            tree.update(target, format!("u{}", rng.gen::<u16>()))
                .ok_or_else(|| WorkFailure::new(format!("{target} missing")))?;
            (
                Applied::Updated { node: target },
                vec![node_snapshot(target, before.as_ref())],
                Vec::new(),
            )
        }
    };

    if fail {
        return Err(WorkFailure::new(format!("injected failure in {}", op.name()))
            .with_snapshots(nodes, edges));
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn setup() -> (SharedTree, ElementId) {
        let (tree, tops) = Tree::grow(1, 3);
        (SharedTree::new(tree), tops[0])
    }

    #[test]
    fn priorities_follow_procedure_table() {
        let mut ops = TreeOp::ALL.to_vec();
        ops.sort_by_key(|op| op.priority());
        assert_eq!(
            ops,
            vec![
                TreeOp::Delete,
                TreeOp::AddEdge,
                TreeOp::AddNode,
                TreeOp::Read,
                TreeOp::Update
            ]
        );
        assert_eq!(TreeOp::Update.id(), ProcedureId(4));
    }

    #[test]
    fn failed_add_node_rolls_back() {
        let (shared, top) = setup();
        let before = shared.lock().node_count();
        let mut rng = StdRng::seed_from_u64(7);

        let failure = {
            let mut tree = shared.lock();
            apply(TreeOp::AddNode, &mut tree, top, &mut rng, true).unwrap_err()
        };
        assert_eq!(shared.lock().node_count(), before + 1);

        let procedure = TreeProcedure::new(TreeOp::AddNode, shared.clone());
        procedure.rollback(&failure.nodes, &failure.edges).unwrap();
        let tree = shared.lock();
        assert_eq!(tree.node_count(), before);
        assert_eq!(tree.edge_count(), before - 1);
    }

    #[test]
    fn failed_update_restores_value() {
        let (shared, top) = setup();
        let mut rng = StdRng::seed_from_u64(11);
        let values: Vec<String> = {
            let tree = shared.lock();
            SectionView::branch(top, &*tree)
                .list_nodes()
                .iter()
                .filter_map(|id| tree.node(*id).map(|n| n.value.clone()))
                .collect()
        };

        let failure = {
            let mut tree = shared.lock();
            apply(TreeOp::Update, &mut tree, top, &mut rng, true).unwrap_err()
        };
        TreeProcedure::new(TreeOp::Update, shared.clone())
            .rollback(&failure.nodes, &failure.edges)
            .unwrap();

        let tree = shared.lock();
        let after: Vec<String> = SectionView::branch(top, &*tree)
            .list_nodes()
            .iter()
            .filter_map(|id| tree.node(*id).map(|n| n.value.clone()))
            .collect();
        assert_eq!(after, values);
    }

    #[test]
    fn malformed_snapshot_fails_rollback() {
        let (shared, _) = setup();
        let bad = NodeSnapshot {
            node: CdsNode {
                id: ElementId(3),
                immutable: false,
            },
            state: serde_json::json!({ "unexpected": true }),
        };
        let err = TreeProcedure::new(TreeOp::Update, shared)
            .rollback(&[bad], &[])
            .unwrap_err();
        assert!(matches!(err, AccessError::RollbackFailed { .. }));
    }

    #[test]
    fn delete_only_takes_leaves() {
        let (shared, top) = setup();
        let mut rng = StdRng::seed_from_u64(3);
        let mut tree = shared.lock();
        for _ in 0..20 {
            if let Ok(Applied::Removed { node, .. }) =
                apply(TreeOp::Delete, &mut tree, top, &mut rng, false)
            {
                assert_ne!(node, top);
            }
        }
        assert!(tree.contains(top));
    }

    #[test]
    fn added_node_joins_section() {
        let (shared, top) = setup();
        let mut section = SectionView::branch(top, &*shared.lock());
        let mut rng = StdRng::seed_from_u64(5);
        let applied = apply(TreeOp::AddNode, &mut shared.lock(), top, &mut rng, false).unwrap();
        applied.update_section(&mut section);
        let Applied::Added { node, edge } = applied else {
            panic!("expected an added node");
        };
        assert!(section.list_nodes().contains(&node));
        assert!(section.list_edges().contains(&edge));
    }
}
