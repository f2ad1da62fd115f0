//! Signals and the per-edge channels that carry them.
//!
//! Every dependency edge owns exactly one channel. The dependency holds the
//! send side ([`SignalPort`]) in its [`SignalingMap`], keyed by the
//! dependent's id; the dependent holds the receive side ([`SignalInbox`]) in
//! its [`SignalsMap`], keyed by the dependency's id.
//!
//! Channels are unbounded: [`broadcast`] never blocks, and a dependent that
//! starts reading late still sees everything sent before it began. A
//! dependent that never drains its inbox only costs memory, never a stalled
//! sender.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use crate::error::SignalError;
use crate::id::{ChannelId, NodeId, ProcedureId};

/// The progress value one node reports to its dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalValue {
    /// The procedure is queued but has not begun.
    Waiting,
    /// The procedure has begun executing.
    Started,
    /// The procedure finished and its effects are committed.
    Completed,
    /// The procedure failed and its effects were rolled back.
    Aborted,
    /// The procedure failed and may succeed if retried. How dependents react
    /// is a caller policy.
    AbortRetry,
    /// The procedure failed after partially applying its effects.
    PartialAbort,
}

impl SignalValue {
    /// Values after which a dependent stops waiting on the sender.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SignalValue::Completed | SignalValue::Aborted | SignalValue::PartialAbort
        )
    }

    /// Values reporting a failed procedure.
    pub fn is_abort(self) -> bool {
        matches!(
            self,
            SignalValue::Aborted | SignalValue::AbortRetry | SignalValue::PartialAbort
        )
    }
}

/// A signal as delivered to a dependent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSignal {
    /// The access procedure the signal reports on.
    pub procedure: ProcedureId,
    /// What happened.
    pub value: SignalValue,
    /// The (V)UI the signal pertains to, when the sender has one.
    pub space: Option<NodeId>,
    /// The node that sent the signal.
    pub origin: NodeId,
}

/// Send side of one edge's channel, held by the dependency.
#[derive(Debug, Clone)]
pub struct SignalPort {
    channel: ChannelId,
    dependent: NodeId,
    tx: mpsc::UnboundedSender<NodeSignal>,
}

/// Receive side of one edge's channel, held by the dependent.
///
/// Cloning shares the same receiver, so a waiter can take a handle out of a
/// locked graph and read from it after the lock is released.
#[derive(Debug, Clone)]
pub struct SignalInbox {
    channel: ChannelId,
    dependency: NodeId,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<NodeSignal>>>,
}

/// Dependent id -> send side, owned by the dependency.
pub type SignalingMap = HashMap<NodeId, SignalPort>;

/// Dependency id -> receive side, owned by the dependent.
pub type SignalsMap = HashMap<NodeId, SignalInbox>;

/// Allocates the channel for the edge `dependent -> dependency`.
pub fn channel(dependency: NodeId, dependent: NodeId) -> (SignalPort, SignalInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let channel = ChannelId::next();
    (
        SignalPort {
            channel,
            dependent,
            tx,
        },
        SignalInbox {
            channel,
            dependency,
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

impl SignalPort {
    pub fn channel_id(&self) -> ChannelId {
        self.channel
    }

    /// The node on the receiving end.
    pub fn dependent(&self) -> NodeId {
        self.dependent
    }

    /// Sends without blocking.
    pub fn send(&self, signal: NodeSignal) -> Result<(), SignalError> {
        self.tx.send(signal).map_err(|_| SignalError::Disconnected {
            dependent: self.dependent,
        })
    }
}

impl SignalInbox {
    pub fn channel_id(&self) -> ChannelId {
        self.channel
    }

    /// The node on the sending end.
    pub fn dependency(&self) -> NodeId {
        self.dependency
    }

    /// Waits for the next signal. Returns `None` once the sender is gone and
    /// every buffered signal has been read.
    pub async fn recv(&self) -> Option<NodeSignal> {
        self.rx.lock().await.recv().await
    }

    /// Returns a buffered signal if one is ready and no other reader holds
    /// the inbox.
    pub fn try_recv(&self) -> Option<NodeSignal> {
        let mut rx = self.rx.try_lock().ok()?;
        rx.try_recv().ok()
    }
}

/// Sends `signal` on every port in `signalers`. Fire-and-forget: ports whose
/// dependent has gone away are skipped. Returns how many ports accepted it.
pub fn broadcast(signalers: &SignalingMap, signal: NodeSignal) -> usize {
    let mut delivered = 0;
    for port in signalers.values() {
        match port.send(signal) {
            Ok(()) => delivered += 1,
            Err(err) => tracing::warn!(origin = %signal.origin, "{}", err),
        }
    }
    delivered
}
