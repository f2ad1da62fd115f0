//! An in-memory tree used as the coordinated data structure.
//!
//! The tree has a single root with one subtree ("branch") per section owner.
//! Node and edge ids come from one counter, so no node shares an id with an
//! edge.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use fabric_core::{CdsEdge, CdsNode, DataStructure, ElementId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: ElementId,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEdge {
    pub id: ElementId,
    pub source: ElementId,
    pub destination: ElementId,
}

#[derive(Debug)]
pub struct Tree {
    root: ElementId,
    nodes: BTreeMap<ElementId, TreeNode>,
    edges: BTreeMap<ElementId, TreeEdge>,
    next_id: u64,
}

impl Tree {
    /// A tree holding only its root.
    pub fn new() -> Self {
        let root = ElementId(1);
        let mut nodes = BTreeMap::new();
        nodes.insert(
            root,
            TreeNode {
                id: root,
                value: "root".to_string(),
            },
        );
        Tree {
            root,
            nodes,
            edges: BTreeMap::new(),
            next_id: 2,
        }
    }

    /// `branches` subtrees under the root, each a full binary tree `depth`
    /// levels deep. Returns the tree and each branch's top node.
    pub fn grow(branches: usize, depth: usize) -> (Self, Vec<ElementId>) {
        let mut tree = Tree::new();
        let root = tree.root;
        let mut tops = Vec::with_capacity(branches);
        for b in 0..branches {
            let Some((top, _)) = tree.add_node(root, format!("branch-{b}")) else {
                continue;
            };
            tops.push(top);
            let mut level = vec![top];
            for d in 1..depth {
                let mut next = Vec::with_capacity(level.len() * 2);
                for parent in level {
                    for c in 0..2 {
                        if let Some((child, _)) = tree.add_node(parent, format!("b{b}-d{d}-{c}")) {
                            next.push(child);
                        }
                    }
                }
                level = next;
            }
        }
        (tree, tops)
    }

    fn next_id(&mut self) -> ElementId {
        let id = ElementId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn root(&self) -> ElementId {
        self.root
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Adds a child under `parent`. Returns the new node and edge ids.
    pub fn add_node(&mut self, parent: ElementId, value: String) -> Option<(ElementId, ElementId)> {
        if !self.nodes.contains_key(&parent) {
            return None;
        }
        let id = self.next_id();
        self.nodes.insert(id, TreeNode { id, value });
        let edge = self.add_edge(parent, id)?;
        Some((id, edge))
    }

    pub fn add_edge(&mut self, source: ElementId, destination: ElementId) -> Option<ElementId> {
        if !self.nodes.contains_key(&source) || !self.nodes.contains_key(&destination) {
            return None;
        }
        let id = self.next_id();
        self.edges.insert(
            id,
            TreeEdge {
                id,
                source,
                destination,
            },
        );
        Some(id)
    }

    /// Nodes `id` has an edge to.
    pub fn children(&self, id: ElementId) -> Vec<ElementId> {
        self.edges
            .values()
            .filter(|e| e.source == id)
            .map(|e| e.destination)
            .collect()
    }

    /// Removes a node and every edge touching it. The root stays.
    pub fn remove_node(&mut self, id: ElementId) -> Option<(TreeNode, Vec<TreeEdge>)> {
        if id == self.root {
            return None;
        }
        let node = self.nodes.remove(&id)?;
        let touching: Vec<ElementId> = self
            .edges
            .values()
            .filter(|e| e.source == id || e.destination == id)
            .map(|e| e.id)
            .collect();
        let edges = touching
            .into_iter()
            .filter_map(|e| self.edges.remove(&e))
            .collect();
        Some((node, edges))
    }

    pub fn remove_edge(&mut self, id: ElementId) -> Option<TreeEdge> {
        self.edges.remove(&id)
    }

    pub fn node(&self, id: ElementId) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    pub fn edge(&self, id: ElementId) -> Option<&TreeEdge> {
        self.edges.get(&id)
    }

    /// Replaces a node's value, returning the old one.
    pub fn update(&mut self, id: ElementId, value: String) -> Option<String> {
        let node = self.nodes.get_mut(&id)?;
        Some(std::mem::replace(&mut node.value, value))
    }

    /// Puts a node back exactly as saved.
    pub fn restore_node(&mut self, node: TreeNode) {
        self.nodes.insert(node.id, node);
    }

    pub fn restore_edge(&mut self, edge: TreeEdge) {
        self.edges.insert(edge.id, edge);
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStructure for Tree {
    fn list_nodes(&self) -> Vec<CdsNode> {
        self.nodes
            .keys()
            .map(|&id| CdsNode {
                id,
                immutable: id == self.root,
            })
            .collect()
    }

    fn list_edges(&self) -> Vec<CdsEdge> {
        self.edges
            .values()
            .map(|e| CdsEdge {
                id: e.id,
                immutable: false,
                source: e.source,
                destination: e.destination,
            })
            .collect()
    }
}

/// A tree shared between the graph (for coverage checks) and the work
/// closures that mutate it.
#[derive(Debug, Clone, Default)]
pub struct SharedTree(Arc<Mutex<Tree>>);

impl SharedTree {
    pub fn new(tree: Tree) -> Self {
        SharedTree(Arc::new(Mutex::new(tree)))
    }

    /// Locks the tree. A panic in another holder does not corrupt the
    /// tree's maps, so a poisoned lock is recovered.
    pub fn lock(&self) -> MutexGuard<'_, Tree> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DataStructure for SharedTree {
    fn list_nodes(&self) -> Vec<CdsNode> {
        self.lock().list_nodes()
    }

    fn list_edges(&self) -> Vec<CdsEdge> {
        self.lock().list_edges()
    }
}
