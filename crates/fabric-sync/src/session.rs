//! Session management.
//!
//! A session is one caller's logical unit of work: a virtual UI in the
//! permanent graph plus a rooted VDG that orders the caller's operations.
//! [`SessionRegistry`] tracks open sessions by UUID.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use fabric_core::{NodeId, Vdg};

/// Unique session identifier (UUID v4 newtype).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An open session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    /// Optional human-readable name.
    pub name: Option<String>,
    /// The session's virtual UI in the permanent graph.
    pub vui: NodeId,
    /// When the session was opened.
    pub opened_at: Instant,
    /// When the session last submitted or executed an operation.
    pub last_active: Instant,
    pub(crate) vdg: Arc<Mutex<Vdg>>,
}

/// Registry of open sessions.
///
/// Backed by `DashMap` so concurrent callers never contend on a registry
/// lock; each session's VDG carries its own lock.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            sessions: DashMap::new(),
        }
    }

    /// Records a session over `vui` and `vdg`, returning its id.
    pub fn register(&self, name: Option<String>, vui: NodeId, vdg: Vdg) -> SessionId {
        let id = SessionId(Uuid::new_v4());
        let now = Instant::now();
        self.sessions.insert(
            id,
            Session {
                id,
                name,
                vui,
                opened_at: now,
                last_active: now,
                vdg: Arc::new(Mutex::new(vdg)),
            },
        );
        id
    }

    /// Returns `true` if the session was registered.
    pub fn deregister(&self, id: &SessionId) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.get(id).map(|entry| entry.clone())
    }

    pub fn list(&self) -> Vec<Session> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Updates the `last_active` timestamp.
    pub fn touch(&self, id: &SessionId) {
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.last_active = Instant::now();
        }
    }

    /// Sessions inactive for at least `timeout`.
    pub fn idle(&self, timeout: Duration) -> Vec<SessionId> {
        let now = Instant::now();
        self.sessions
            .iter()
            .filter(|entry| now.duration_since(entry.last_active) >= timeout)
            .map(|entry| *entry.key())
            .collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_core::DependencyGraph;

    fn vdg() -> Vdg {
        Vdg::with_root(&mut DependencyGraph::new())
    }

    #[test]
    fn register_and_get() {
        let registry = SessionRegistry::new();
        let id = registry.register(Some("alpha".into()), NodeId(7), vdg());
        let session = registry.get(&id).unwrap();
        assert_eq!(session.name.as_deref(), Some("alpha"));
        assert_eq!(session.vui, NodeId(7));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn deregister_reports_presence() {
        let registry = SessionRegistry::new();
        let id = registry.register(None, NodeId(1), vdg());
        assert!(registry.deregister(&id));
        assert!(!registry.deregister(&id));
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn idle_respects_timeout() {
        let registry = SessionRegistry::new();
        let id = registry.register(None, NodeId(1), vdg());
        assert_eq!(registry.idle(Duration::ZERO), vec![id]);
        assert!(registry.idle(Duration::from_secs(3600)).is_empty());
    }

    #[test]
    fn touch_refreshes_activity() {
        let registry = SessionRegistry::new();
        let id = registry.register(None, NodeId(1), vdg());
        let before = registry.get(&id).unwrap().last_active;
        registry.touch(&id);
        assert!(registry.get(&id).unwrap().last_active >= before);
    }
}
