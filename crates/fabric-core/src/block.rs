//! Waiting on dependencies.
//!
//! A node blocks only by reading its inboxes. [`block_on_dependencies`]
//! spawns one reader per inbox and returns once every reader has exited:
//! on `Completed`, `Aborted` or `PartialAbort`, on `AbortRetry` when the
//! [`AbortRetryPolicy`] says so, or when the channel closes. There is no
//! timeout here; callers needing bounded latency wrap the future.

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::id::NodeId;
use crate::signal::{NodeSignal, SignalInbox, SignalValue};

/// How a reader treats an `AbortRetry` from its dependency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbortRetryPolicy {
    /// Stop waiting on that dependency.
    #[default]
    StopWaiting,
    /// Keep waiting for the retried procedure's terminal signal.
    KeepWaiting,
}

impl std::str::FromStr for AbortRetryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stop" | "stop-waiting" => Ok(AbortRetryPolicy::StopWaiting),
            "keep" | "keep-waiting" => Ok(AbortRetryPolicy::KeepWaiting),
            other => Err(format!("unknown abort-retry policy '{other}'")),
        }
    }
}

/// How one dependency released its reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Release {
    /// The last signal read.
    Signaled(NodeSignal),
    /// The sender went away without a terminal signal.
    Disconnected,
}

/// Per-dependency results of one wait, ordered by dependency id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitOutcome {
    pub releases: Vec<(NodeId, Release)>,
}

impl WaitOutcome {
    /// Every dependency completed. Vacuously true with none.
    pub fn all_completed(&self) -> bool {
        self.releases.iter().all(|(_, r)| {
            matches!(
                r,
                Release::Signaled(NodeSignal {
                    value: SignalValue::Completed,
                    ..
                })
            )
        })
    }

    /// Dependencies that reported a failed procedure.
    pub fn aborted(&self) -> Vec<NodeId> {
        self.releases
            .iter()
            .filter(|(_, r)| matches!(r, Release::Signaled(s) if s.value.is_abort()))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn disconnected(&self) -> Vec<NodeId> {
        self.releases
            .iter()
            .filter(|(_, r)| matches!(r, Release::Disconnected))
            .map(|(id, _)| *id)
            .collect()
    }
}

async fn read_until_released(inbox: SignalInbox, policy: AbortRetryPolicy) -> (NodeId, Release) {
    let dependency = inbox.dependency();
    loop {
        let Some(signal) = inbox.recv().await else {
            return (dependency, Release::Disconnected);
        };
        match signal.value {
            SignalValue::Waiting | SignalValue::Started => continue,
            SignalValue::AbortRetry if policy == AbortRetryPolicy::KeepWaiting => continue,
            _ => return (dependency, Release::Signaled(signal)),
        }
    }
}

/// Blocks until every inbox has released its reader. Must run inside a
/// Tokio runtime.
pub async fn block_on_dependencies(
    inboxes: Vec<SignalInbox>,
    policy: AbortRetryPolicy,
) -> WaitOutcome {
    let mut readers = JoinSet::new();
    for inbox in inboxes {
        readers.spawn(read_until_released(inbox, policy));
    }

    let mut outcome = WaitOutcome::default();
    while let Some(joined) = readers.join_next().await {
        match joined {
            Ok((dependency, release)) => {
                if release == Release::Disconnected {
                    tracing::warn!(%dependency, "dependency channel closed without a terminal signal");
                }
                outcome.releases.push((dependency, release));
            }
            Err(err) => tracing::warn!("dependency reader failed: {}", err),
        }
    }
    outcome.releases.sort_by_key(|(id, _)| *id);
    outcome
}
