//! Stable ID newtypes for graph entities.
//!
//! All IDs are distinct newtype wrappers over `u64`, providing type safety
//! so that a `NodeId` (a dependency-graph node) cannot be accidentally used
//! where an `ElementId` (a node or edge of the coordinated data structure)
//! is expected.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Dependency-graph node identifier (UI, Temporal or Virtual node).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Identity of a node or edge of the coordinated data structure (CDS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementId(pub u64);

/// Stable identity of an access procedure definition. Used as the key that
/// tags every signal a procedure emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcedureId(pub u32);

/// Identity of a virtual dependency graph registered with a permanent graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VdgId(pub u64);

/// Identity of one signaling channel. Both ends of an edge's channel report
/// the same `ChannelId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

// Display implementations -- just print the inner value.

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ProcedureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for VdgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Draws random ids until one is found that `taken` rejects.
///
/// Collision-free only with respect to what `taken` can see; ids are not
/// globally unique across graphs.
pub fn generate_unique(mut taken: impl FnMut(u64) -> bool) -> u64 {
    let mut rng = rand::thread_rng();
    loop {
        let candidate: u64 = rng.gen();
        if !taken(candidate) {
            return candidate;
        }
    }
}

static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(1);
static NEXT_VDG: AtomicU64 = AtomicU64::new(1);

impl ChannelId {
    /// Allocates a process-unique channel id.
    pub fn next() -> Self {
        ChannelId(NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed))
    }
}

impl VdgId {
    /// Allocates a process-unique VDG id.
    pub fn next() -> Self {
        VdgId(NEXT_VDG.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_display() {
        assert_eq!(format!("{}", NodeId(7)), "7");
    }

    #[test]
    fn element_id_display() {
        assert_eq!(format!("{}", ElementId(99)), "99");
    }

    #[test]
    fn generate_unique_retries_on_collision() {
        let mut calls = 0;
        let mut last = None;
        let id = generate_unique(|candidate| {
            calls += 1;
            last = Some(candidate);
            calls < 4
        });
        assert_eq!(calls, 4);
        assert_eq!(last, Some(id));
    }

    #[test]
    fn channel_ids_are_monotonic() {
        let a = ChannelId::next();
        let b = ChannelId::next();
        assert!(b.0 > a.0);
    }

    #[test]
    fn serde_roundtrip() {
        let node = NodeId(42);
        let json = serde_json::to_string(&node).unwrap();
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(node, back);
    }
}
