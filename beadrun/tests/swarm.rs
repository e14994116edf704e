//! Worker pool scenarios driven by a scripted executor over an in-memory store.

use std::time::Duration;

use beadrun::cancel::CancellationCoordinator;
use beadrun::core::lifecycle::Transition;
use beadrun::core::types::{Bead, BeadStatus};
use beadrun::exit_codes;
use beadrun::io::memory_store::MemoryStore;
use beadrun::io::store::{BeadFilter, BeadStore};
use beadrun::ledger::apply_transition;
use beadrun::report::{BlockedBead, RunEvent, RunReport, StopReason};
use beadrun::scope::load_graph;
use beadrun::swarm::{SwarmConfig, run_swarm};
use beadrun::test_support::{
    Script, ScriptedExecutor, bead, bead_with_deps, impl_bead, test_bead, with_status,
};

async fn swarm(
    store: &MemoryStore,
    executor: &ScriptedExecutor,
    max_workers: usize,
    cancel: &CancellationCoordinator,
) -> (RunReport, Vec<RunEvent>) {
    let graph = load_graph(store, &BeadFilter::default()).expect("graph");
    let mut events = Vec::new();
    let report = run_swarm(
        store,
        graph,
        executor,
        &SwarmConfig { max_workers },
        cancel,
        |event| events.push(event.clone()),
    )
    .await
    .expect("swarm");
    (report, events)
}

fn position(events: &[RunEvent], wanted: impl Fn(&RunEvent) -> bool) -> usize {
    events.iter().position(wanted).expect("event present")
}

fn dispatched(id: &str) -> impl Fn(&RunEvent) -> bool + '_ {
    move |event| matches!(event, RunEvent::Dispatched { bead_id, .. } if bead_id == id)
}

fn resolved(id: &str) -> impl Fn(&RunEvent) -> bool + '_ {
    move |event| matches!(event, RunEvent::Resolved(resolution) if resolution.bead_id == id)
}

fn status(store: &MemoryStore, id: &str) -> BeadStatus {
    store.get(id).expect("bead").status
}

fn tdd_pairs() -> Vec<Bead> {
    vec![
        test_bead("T1", 1),
        impl_bead("I1", 2, &["T1"]),
        test_bead("T2", 1),
        impl_bead("I2", 2, &["T2", "I1"]),
    ]
}

#[tokio::test]
async fn tdd_pairs_respect_test_before_impl() {
    let store = MemoryStore::with_beads(tdd_pairs());
    let executor = ScriptedExecutor::new();
    let cancel = CancellationCoordinator::new();

    let (report, events) = swarm(&store, &executor, 2, &cancel).await;

    let mut first_tick = executor.calls()[..2].to_vec();
    first_tick.sort();
    assert_eq!(first_tick, vec!["T1".to_string(), "T2".to_string()]);
    assert!(position(&events, resolved("T1")) < position(&events, dispatched("I1")));
    assert!(position(&events, resolved("T2")) < position(&events, dispatched("I2")));
    assert!(position(&events, resolved("I1")) < position(&events, dispatched("I2")));
    assert_eq!(executor.calls().last().map(String::as_str), Some("I2"));

    assert_eq!(report.stop, StopReason::Drained);
    assert_eq!(report.dispatched, 4);
    assert_eq!(report.completed.len(), 4);
    assert_eq!(report.exit_code(), exit_codes::OK);
    for id in ["T1", "I1", "T2", "I2"] {
        assert_eq!(status(&store, id), BeadStatus::Completed);
    }
}

#[tokio::test]
async fn failed_dependency_leaves_dependent_unreachable() {
    let store = MemoryStore::with_beads(vec![bead("A", 0), bead_with_deps("B", 0, &["A"])]);
    let executor = ScriptedExecutor::new().script("A", Script::Fail("exit 1: boom".to_string()));
    let cancel = CancellationCoordinator::new();

    let (report, _) = swarm(&store, &executor, 3, &cancel).await;

    assert_eq!(executor.calls(), vec!["A".to_string()]);
    assert_eq!(report.stop, StopReason::Stuck);
    assert!(report.completed.is_empty());
    assert_eq!(
        report.blocked,
        vec![BlockedBead {
            id: "A".to_string(),
            reason: Some("exit 1: boom".to_string()),
        }]
    );
    assert_eq!(report.unreachable, vec!["B".to_string()]);
    assert_eq!(report.exit_code(), exit_codes::INCOMPLETE);
    assert_eq!(status(&store, "A"), BeadStatus::Blocked);
    assert_eq!(status(&store, "B"), BeadStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn pool_never_exceeds_max_workers_and_drains() {
    let beads: Vec<Bead> = (0..10).map(|n| bead(&format!("b{n}"), 0)).collect();
    let mut executor = ScriptedExecutor::new();
    for n in 0..10u64 {
        executor = executor.script(
            &format!("b{n}"),
            Script::SucceedAfter(Duration::from_millis(10 + (n * 7) % 30)),
        );
    }
    let store = MemoryStore::with_beads(beads);
    let cancel = CancellationCoordinator::new();

    let (report, _) = swarm(&store, &executor, 3, &cancel).await;

    assert_eq!(executor.peak_in_flight(), 3);
    assert_eq!(report.completed.len(), 10);
    assert_eq!(report.stop, StopReason::Drained);
}

#[tokio::test]
async fn failure_is_contained_to_its_bead_and_dependents() {
    let store = MemoryStore::with_beads(vec![
        bead("A", 0),
        bead_with_deps("B", 0, &["A"]),
        bead("C", 1),
        bead_with_deps("D", 1, &["C"]),
    ]);
    let executor = ScriptedExecutor::new().script("A", Script::Fail("red".to_string()));
    let cancel = CancellationCoordinator::new();

    let (report, _) = swarm(&store, &executor, 2, &cancel).await;

    assert_eq!(report.completed, vec!["C".to_string(), "D".to_string()]);
    assert_eq!(report.blocked.len(), 1);
    assert_eq!(report.unreachable, vec!["B".to_string()]);
}

#[tokio::test]
async fn graceful_cancel_records_in_flight_results_and_dispatches_nothing_new() {
    let store = MemoryStore::with_beads(vec![bead("a", 0), bead("b", 1), bead("c", 2)]);
    let cancel = CancellationCoordinator::new();
    let hook_cancel = cancel.clone();
    let executor = ScriptedExecutor::new()
        .script("a", Script::Fail("flaky".to_string()))
        .on_execute(move |bead| {
            if bead.id == "b" {
                hook_cancel.request_cancel();
            }
        });

    let (report, _) = swarm(&store, &executor, 2, &cancel).await;

    assert_eq!(report.stop, StopReason::Cancelled);
    assert_eq!(report.exit_code(), exit_codes::CANCELLED);
    assert_eq!(executor.calls().len(), 2);
    // Natural outcomes of in-flight work are kept; nothing is forced.
    assert_eq!(status(&store, "a"), BeadStatus::Blocked);
    assert_eq!(status(&store, "b"), BeadStatus::Completed);
    assert_eq!(status(&store, "c"), BeadStatus::Pending);
    assert_eq!(report.ready, vec!["c".to_string()]);
}

#[tokio::test]
async fn cancel_during_the_last_unit_still_reports_drained() {
    let store = MemoryStore::with_beads(vec![bead("a", 0), bead_with_deps("b", 0, &["a"])]);
    let cancel = CancellationCoordinator::new();
    let hook_cancel = cancel.clone();
    let executor = ScriptedExecutor::new().on_execute(move |bead| {
        if bead.id == "b" {
            hook_cancel.request_cancel();
        }
    });

    let (report, _) = swarm(&store, &executor, 2, &cancel).await;

    assert!(cancel.is_cancelled());
    assert_eq!(report.stop, StopReason::Drained);
    assert_eq!(report.completed, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(report.exit_code(), exit_codes::OK);
}

#[tokio::test]
async fn hard_stop_leaves_in_flight_beads_in_progress() {
    let store = MemoryStore::with_beads(vec![bead("a", 0), bead("b", 1), bead("c", 2)]);
    let cancel = CancellationCoordinator::new();
    let hook_cancel = cancel.clone();
    let executor = ScriptedExecutor::new()
        .script("a", Script::Hang)
        .script("b", Script::Hang)
        .on_execute(move |bead| {
            if bead.id == "b" {
                hook_cancel.stop_now();
            }
        });

    let (report, _) = swarm(&store, &executor, 2, &cancel).await;

    assert_eq!(report.stop, StopReason::Interrupted);
    assert_eq!(report.interrupted, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(report.exit_code(), exit_codes::CANCELLED);
    assert_eq!(status(&store, "a"), BeadStatus::InProgress);
    assert_eq!(status(&store, "b"), BeadStatus::InProgress);
    assert_eq!(status(&store, "c"), BeadStatus::Pending);
}

#[tokio::test]
async fn rerun_after_cancel_resumes_from_store() {
    let store = MemoryStore::with_beads(vec![bead("a", 0), bead_with_deps("b", 0, &["a"])]);
    let cancel = CancellationCoordinator::new();
    let hook_cancel = cancel.clone();
    let executor = ScriptedExecutor::new().on_execute(move |_| {
        hook_cancel.request_cancel();
    });
    let (first, _) = swarm(&store, &executor, 2, &cancel).await;
    assert_eq!(first.completed, vec!["a".to_string()]);

    let fresh = ScriptedExecutor::new();
    let (second, _) = swarm(&store, &fresh, 2, &CancellationCoordinator::new()).await;
    assert_eq!(fresh.calls(), vec!["b".to_string()]);
    assert_eq!(second.stop, StopReason::Drained);
    assert_eq!(second.exit_code(), exit_codes::OK);
}

#[tokio::test]
async fn retried_bead_is_ready_on_next_run() {
    let store = MemoryStore::with_beads(vec![bead("A", 0), bead_with_deps("B", 0, &["A"])]);
    let failing = ScriptedExecutor::new().script("A", Script::Fail("red".to_string()));
    swarm(&store, &failing, 2, &CancellationCoordinator::new()).await;

    apply_transition(&store, "A", Transition::Retry, None).expect("retry");
    let graph = load_graph(&store, &BeadFilter::default()).expect("graph");
    let ready: Vec<&str> = graph.ready().iter().map(|b| b.id.as_str()).collect();
    assert_eq!(ready, vec!["A"]);

    let fresh = ScriptedExecutor::new();
    let (report, _) = swarm(&store, &fresh, 2, &CancellationCoordinator::new()).await;
    assert_eq!(report.completed, vec!["A".to_string(), "B".to_string()]);
}

#[tokio::test]
async fn dependency_held_by_another_run_is_waiting_not_stuck_work() {
    let store = MemoryStore::with_beads(vec![
        with_status(bead("x", 0), BeadStatus::InProgress),
        bead_with_deps("y", 0, &["x"]),
    ]);
    let executor = ScriptedExecutor::new();
    let (report, _) = swarm(&store, &executor, 2, &CancellationCoordinator::new()).await;

    assert!(executor.calls().is_empty());
    assert_eq!(report.stop, StopReason::Stuck);
    assert_eq!(report.waiting, vec!["y".to_string()]);
    assert!(report.unreachable.is_empty());
    assert_eq!(report.in_progress, vec!["x".to_string()]);
}

#[tokio::test]
async fn zero_workers_is_rejected_before_dispatch() {
    let store = MemoryStore::with_beads(vec![bead("a", 0)]);
    let graph = load_graph(&store, &BeadFilter::default()).expect("graph");
    let executor = ScriptedExecutor::new();
    let err = run_swarm(
        &store,
        graph,
        &executor,
        &SwarmConfig { max_workers: 0 },
        &CancellationCoordinator::new(),
        |_| {},
    )
    .await
    .expect_err("invalid");
    assert!(err.to_string().contains("max_workers"));
    assert_eq!(status(&store, "a"), BeadStatus::Pending);
}
