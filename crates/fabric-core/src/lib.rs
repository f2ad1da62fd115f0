pub mod access;
pub mod block;
pub mod cds;
pub mod error;
pub mod graph;
pub mod id;
pub mod node;
pub mod poset;
pub mod section;
pub mod signal;
pub mod topology;
pub mod vdg;

// Re-export commonly used types
pub use access::{AccessProcedure, EdgeSnapshot, NodeSnapshot, ProcedureList};
pub use block::{block_on_dependencies, AbortRetryPolicy, Release, WaitOutcome};
pub use cds::{CdsEdge, CdsNode, DataStructure, FixedStructure};
pub use error::{AccessError, GraphError, SignalError};
pub use graph::{DependencyGraph, TotalityConflict};
pub use id::{ChannelId, ElementId, NodeId, ProcedureId, VdgId};
pub use node::{GraphNode, NodeKind, NodeType, VirtualState};
pub use poset::{OrderingScope, Placement, Poset};
pub use section::{compose_sections, EdgeList, NodeList, Section, SectionKind, SectionView};
pub use signal::{NodeSignal, SignalInbox, SignalPort, SignalValue, SignalingMap, SignalsMap};
pub use topology::Topology;
pub use vdg::Vdg;
