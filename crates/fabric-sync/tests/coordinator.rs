//! Integration tests for session coordination: ordering, rollback, commit
//! failure, timeouts and session lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use fabric_core::access::progress_signal;
use fabric_core::{
    AccessError, AccessProcedure, CdsNode, DependencyGraph, EdgeSnapshot, ElementId, GraphError,
    GraphNode, NodeId, NodeSignal, NodeSnapshot, ProcedureId, ProcedureList, Release,
    SectionView, SignalValue,
};
use fabric_sync::{Coordinator, CoordinatorConfig, CoordinatorError, SessionId, WorkFailure};

#[derive(Debug)]
struct Step {
    id: u32,
    priority: i32,
    fail_commit: bool,
    rollbacks: Arc<AtomicUsize>,
}

impl AccessProcedure for Step {
    fn id(&self) -> ProcedureId {
        ProcedureId(self.id)
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn commit(&self, node: &GraphNode) -> Result<(), AccessError> {
        if self.fail_commit {
            return Err(AccessError::CommitFailed {
                procedure: self.id(),
                reason: "refused".into(),
            });
        }
        node.signal(progress_signal(self.id(), node, SignalValue::Completed));
        Ok(())
    }

    fn rollback(&self, nodes: &[NodeSnapshot], _: &[EdgeSnapshot]) -> Result<(), AccessError> {
        self.rollbacks.fetch_add(nodes.len().max(1), Ordering::SeqCst);
        Ok(())
    }
}

fn step(priority: i32) -> ProcedureList {
    vec![Arc::new(Step {
        id: priority as u32,
        priority,
        fail_commit: false,
        rollbacks: Arc::new(AtomicUsize::new(0)),
    })]
}

fn section() -> SectionView {
    SectionView::disjoint([ElementId(1), ElementId(2)], [])
}

fn coordinator() -> Coordinator {
    Coordinator::new(DependencyGraph::new(), CoordinatorConfig::default())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn executes_in_priority_order() {
    let coordinator = coordinator();
    let session = coordinator
        .open_session(Some("writer".into()), section())
        .await
        .unwrap();

    let mut tickets = Vec::new();
    for p in [5, 3, 8] {
        tickets.push(coordinator.submit(session, step(p)).await.unwrap());
    }

    let log = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for ticket in tickets {
        let coordinator = coordinator.clone();
        let log = Arc::clone(&log);
        let priority = ticket.priority;
        handles.push(tokio::spawn(async move {
            coordinator
                .execute(&ticket, move || {
                    log.lock().unwrap().push(priority);
                    Ok(())
                })
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().committed);
    }

    assert_eq!(*log.lock().unwrap(), vec![3, 5, 8]);
    coordinator.close_session(session).await.unwrap();
}

#[tokio::test]
async fn rollback_signals_aborted_downstream() {
    let coordinator = coordinator();
    let session = coordinator.open_session(None, section()).await.unwrap();

    let rollbacks = Arc::new(AtomicUsize::new(0));
    let failing: ProcedureList = vec![Arc::new(Step {
        id: 3,
        priority: 3,
        fail_commit: false,
        rollbacks: Arc::clone(&rollbacks),
    })];
    let first = coordinator.submit(session, failing).await.unwrap();
    let second = coordinator.submit(session, step(5)).await.unwrap();
    assert_eq!(second.placement.dependencies, vec![first.node]);

    let snapshot = NodeSnapshot {
        node: CdsNode {
            id: ElementId(1),
            immutable: false,
        },
        state: json!({ "value": "before" }),
    };
    let report = coordinator
        .execute(&first, || {
            Err(WorkFailure::new("boom").with_snapshots(vec![snapshot], Vec::new()))
        })
        .await
        .unwrap();
    assert!(!report.committed);
    assert_eq!(report.failure.as_deref(), Some("boom"));
    assert_eq!(rollbacks.load(Ordering::SeqCst), 1);

    let report = coordinator.execute(&second, || Ok(())).await.unwrap();
    assert!(report.committed);
    assert_eq!(report.upstream.aborted(), vec![first.node]);
    assert_eq!(report.swept, vec![second.node, first.node]);

    coordinator.close_session(session).await.unwrap();
}

#[tokio::test]
async fn failed_commit_is_returned_and_partially_aborts() {
    let coordinator = coordinator();
    let session = coordinator.open_session(None, section()).await.unwrap();

    let refusing: ProcedureList = vec![Arc::new(Step {
        id: 1,
        priority: 1,
        fail_commit: true,
        rollbacks: Arc::new(AtomicUsize::new(0)),
    })];
    let first = coordinator.submit(session, refusing).await.unwrap();
    let second = coordinator.submit(session, step(2)).await.unwrap();

    let err = coordinator.execute(&first, || Ok(())).await.unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Access(AccessError::CommitFailed { .. })
    ));

    let report = coordinator.execute(&second, || Ok(())).await.unwrap();
    assert_eq!(report.upstream.aborted(), vec![first.node]);
}

#[tokio::test]
async fn later_commit_failure_never_reports_completed() {
    let coordinator = coordinator();
    let session = coordinator.open_session(None, section()).await.unwrap();

    let procedures: ProcedureList = vec![
        Arc::new(Step {
            id: 1,
            priority: 1,
            fail_commit: false,
            rollbacks: Arc::new(AtomicUsize::new(0)),
        }),
        Arc::new(Step {
            id: 2,
            priority: 2,
            fail_commit: true,
            rollbacks: Arc::new(AtomicUsize::new(0)),
        }),
    ];
    let first = coordinator.submit(session, procedures).await.unwrap();
    let second = coordinator.submit(session, step(3)).await.unwrap();
    assert_eq!(second.placement.dependencies, vec![first.node]);

    let err = coordinator.execute(&first, || Ok(())).await.unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Access(AccessError::CommitFailed { procedure, .. })
            if procedure == ProcedureId(2)
    ));

    let report = coordinator.execute(&second, || Ok(())).await.unwrap();
    assert!(!report.upstream.all_completed());
    assert_eq!(report.upstream.aborted(), vec![first.node]);
    assert!(matches!(
        report.upstream.releases.as_slice(),
        [(node, Release::Signaled(NodeSignal { value: SignalValue::PartialAbort, .. }))]
            if *node == first.node
    ));
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let coordinator = coordinator();
    let ghost = SessionId(Uuid::new_v4());
    assert!(matches!(
        coordinator.close_session(ghost).await,
        Err(CoordinatorError::NotFound {
            kind: "session",
            ..
        })
    ));
    assert!(matches!(
        coordinator.submit(ghost, step(1)).await,
        Err(CoordinatorError::NotFound { .. })
    ));
}

#[tokio::test]
async fn close_removes_vui_and_vdg() {
    let coordinator = coordinator();
    let session = coordinator.open_session(None, section()).await.unwrap();
    let vui = coordinator.sessions()[0].vui;
    {
        let graph = coordinator.graph();
        let graph = graph.read().await;
        assert!(graph.contains(vui));
        assert_eq!(graph.vdgs().count(), 1);
    }

    let ticket = coordinator.submit(session, step(1)).await.unwrap();
    coordinator.execute(&ticket, || Ok(())).await.unwrap();
    coordinator.close_session(session).await.unwrap();

    let graph = coordinator.graph();
    let graph = graph.read().await;
    assert!(!graph.contains(vui));
    assert_eq!(graph.vdgs().count(), 0);
    assert!(coordinator.sessions().is_empty());
    drop(graph);

    assert!(matches!(
        coordinator.execute(&ticket, || Ok(())).await,
        Err(CoordinatorError::NotFound { .. })
    ));
}

#[tokio::test]
async fn executing_twice_is_not_found() {
    let coordinator = coordinator();
    let session = coordinator.open_session(None, section()).await.unwrap();
    let ticket = coordinator.submit(session, step(1)).await.unwrap();
    coordinator.execute(&ticket, || Ok(())).await.unwrap();
    assert!(matches!(
        coordinator.execute(&ticket, || Ok(())).await,
        Err(CoordinatorError::NotFound {
            kind: "operation",
            ..
        })
    ));
}

#[tokio::test]
async fn bounded_wait_times_out() {
    let config = CoordinatorConfig {
        wait_timeout: Some(Duration::from_millis(50)),
        ..CoordinatorConfig::default()
    };
    let coordinator = Coordinator::new(DependencyGraph::new(), config);
    let session = coordinator.open_session(None, section()).await.unwrap();

    let first = coordinator.submit(session, step(3)).await.unwrap();
    let second = coordinator.submit(session, step(5)).await.unwrap();

    let err = coordinator.execute(&second, || Ok(())).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::WaitTimedOut { node, .. } if node == second.node));

    // The abandoned operation is gone; its dependency can still run.
    coordinator.execute(&first, || Ok(())).await.unwrap();
    coordinator.close_session(session).await.unwrap();
}

#[tokio::test]
async fn sweep_inactive_closes_idle_sessions() {
    let coordinator = coordinator();
    let session = coordinator.open_session(None, section()).await.unwrap();
    assert!(coordinator
        .sweep_inactive(Duration::from_secs(3600))
        .await
        .is_empty());
    assert_eq!(coordinator.sweep_inactive(Duration::ZERO).await, vec![session]);
    assert!(coordinator.sessions().is_empty());
}

#[tokio::test]
async fn wait_for_node_blocks_on_permanent_dependencies() {
    let coordinator = coordinator();
    {
        let graph = coordinator.graph();
        let mut graph = graph.write().await;
        graph.add_real_node(GraphNode::ui(NodeId(1), section())).unwrap();
        graph
            .add_real_node(GraphNode::temporal(NodeId(2), NodeId(1)))
            .unwrap();
        graph.add_edge(NodeId(2), NodeId(1)).unwrap();
    }

    let waiter = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.wait_for_node(NodeId(2)).await })
    };

    let done = NodeSignal {
        procedure: ProcedureId(1),
        value: SignalValue::Completed,
        space: Some(NodeId(1)),
        origin: NodeId(1),
    };
    coordinator
        .graph()
        .read()
        .await
        .signal(NodeId(1), done)
        .unwrap();

    let outcome = waiter.await.unwrap().unwrap();
    assert!(outcome.all_completed());
    assert_eq!(outcome.releases.len(), 1);

    assert!(matches!(
        coordinator.wait_for_node(NodeId(9)).await,
        Err(CoordinatorError::Graph(GraphError::NodeNotFound { .. }))
    ));
}
