//! End-of-run report shared by the swarm and loop strategies.

use std::fmt;

use crate::core::graph::Graph;
use crate::core::types::{Bead, BeadId, BeadStatus, ExecutionResult};
use crate::exit_codes;

/// Which strategy produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Swarm,
    Loop,
    AutoLoop,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Swarm => "swarm",
            Strategy::Loop => "loop",
            Strategy::AutoLoop => "auto-loop",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work that finished and whose result was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub bead_id: BeadId,
    pub title: String,
    pub result: ExecutionResult,
}

impl Resolution {
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.is_success() { "completed" } else { "blocked" };
        write!(
            f,
            "{} ({}) {verdict}: {}",
            self.bead_id, self.title, self.result.detail
        )
    }
}

/// Progress notifications emitted while a strategy runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Dispatched { bead_id: BeadId, title: String },
    Resolved(Resolution),
}

/// Why a strategy stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Nothing is ready and no pending bead remains in scope.
    Drained,
    /// Nothing is ready but pending beads remain (unreachable or waiting).
    Stuck,
    /// Graceful cancellation: nothing new was dispatched, in-flight work finished.
    Cancelled,
    /// Hard stop: in-flight beads were abandoned in `in_progress`.
    Interrupted,
    /// The loop operator chose to stop.
    OperatorStopped,
    /// The configured step limit was reached.
    StepLimit,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Drained => "drained",
            StopReason::Stuck => "stuck",
            StopReason::Cancelled => "cancelled",
            StopReason::Interrupted => "interrupted",
            StopReason::OperatorStopped => "operator-stopped",
            StopReason::StepLimit => "step-limit",
        }
    }

    /// Stops that came from outside the scheduler rather than from the graph.
    pub fn is_requested(self) -> bool {
        matches!(
            self,
            StopReason::Cancelled | StopReason::Interrupted | StopReason::OperatorStopped
        )
    }

    /// `Drained` or `Stuck`, depending on whether pending beads remain.
    pub fn at_exhaustion(graph: &Graph) -> Self {
        if graph.beads().any(|bead| bead.status == BeadStatus::Pending) {
            StopReason::Stuck
        } else {
            StopReason::Drained
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedBead {
    pub id: BeadId,
    pub reason: Option<String>,
}

/// Final state of the scoped beads after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub strategy: Strategy,
    pub stop: StopReason,
    /// Units dispatched by this invocation.
    pub dispatched: usize,
    pub completed: Vec<BeadId>,
    pub blocked: Vec<BlockedBead>,
    pub unreachable: Vec<BeadId>,
    pub waiting: Vec<BeadId>,
    /// Ready beads this run did not get to (cancellation or step limit).
    pub ready: Vec<BeadId>,
    /// Beads this run started and abandoned on a hard stop.
    pub interrupted: Vec<BeadId>,
    /// Beads already `in_progress` when the run began.
    pub in_progress: Vec<BeadId>,
}

impl RunReport {
    pub fn from_graph(
        strategy: Strategy,
        stop: StopReason,
        dispatched: usize,
        graph: &Graph,
        mut interrupted: Vec<BeadId>,
    ) -> Self {
        interrupted.sort();
        let mut completed = Vec::new();
        let mut blocked = Vec::new();
        let mut in_progress = Vec::new();
        for bead in graph.beads() {
            match bead.status {
                BeadStatus::Completed => completed.push(bead.id.clone()),
                BeadStatus::Blocked => blocked.push(BlockedBead {
                    id: bead.id.clone(),
                    reason: bead.reason.clone(),
                }),
                BeadStatus::InProgress if interrupted.binary_search(&bead.id).is_err() => {
                    in_progress.push(bead.id.clone());
                }
                BeadStatus::InProgress | BeadStatus::Pending => {}
            }
        }

        Self {
            strategy,
            stop,
            dispatched,
            completed,
            blocked,
            unreachable: ids(graph.unreachable()),
            waiting: ids(graph.waiting()),
            ready: ids(graph.ready()),
            interrupted,
            in_progress,
        }
    }

    /// True when every scoped bead ended `completed`.
    pub fn is_complete(&self) -> bool {
        self.blocked.is_empty()
            && self.unreachable.is_empty()
            && self.waiting.is_empty()
            && self.ready.is_empty()
            && self.interrupted.is_empty()
            && self.in_progress.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.stop.is_requested() {
            exit_codes::CANCELLED
        } else if self.is_complete() {
            exit_codes::OK
        } else {
            exit_codes::INCOMPLETE
        }
    }

    /// Human-readable summary, one line per non-empty category plus a totals line.
    pub fn render_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "{}: stopped ({}), dispatched {}",
            self.strategy, self.stop, self.dispatched
        )];
        push_list(&mut lines, "completed", &self.completed);
        if !self.blocked.is_empty() {
            lines.push("blocked:".to_string());
            for bead in &self.blocked {
                lines.push(format!(
                    "  {}: {}",
                    bead.id,
                    bead.reason.as_deref().unwrap_or("no reason recorded")
                ));
            }
        }
        push_list(&mut lines, "unreachable", &self.unreachable);
        push_list(&mut lines, "waiting", &self.waiting);
        push_list(&mut lines, "ready", &self.ready);
        push_list(&mut lines, "interrupted", &self.interrupted);
        push_list(&mut lines, "in_progress", &self.in_progress);
        lines.push(format!(
            "summary: completed={} blocked={} unreachable={} waiting={} ready={} interrupted={}",
            self.completed.len(),
            self.blocked.len(),
            self.unreachable.len(),
            self.waiting.len(),
            self.ready.len(),
            self.interrupted.len(),
        ));
        lines
    }
}

fn ids(beads: Vec<&Bead>) -> Vec<BeadId> {
    beads.into_iter().map(|bead| bead.id.clone()).collect()
}

fn push_list(lines: &mut Vec<String>, label: &str, ids: &[BeadId]) {
    if !ids.is_empty() {
        lines.push(format!("{label}: {}", ids.join(", ")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bead, bead_with_deps, with_status};

    #[test]
    fn failed_root_reports_blocked_with_reason_and_unreachable_dependent() {
        let mut a = with_status(bead("A", 0), BeadStatus::Blocked);
        a.reason = Some("exit 1: boom".to_string());
        let graph = Graph::build(vec![a, bead_with_deps("B", 0, &["A"])]).expect("graph");

        let report = RunReport::from_graph(
            Strategy::Swarm,
            StopReason::at_exhaustion(&graph),
            1,
            &graph,
            Vec::new(),
        );
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

        let lines = report.render_lines();
        assert!(lines.contains(&"  A: exit 1: boom".to_string()));
        assert_eq!(
            lines.last().map(String::as_str),
            Some("summary: completed=0 blocked=1 unreachable=1 waiting=0 ready=0 interrupted=0")
        );
    }

    #[test]
    fn all_completed_is_drained_and_ok() {
        let graph = Graph::build(vec![
            with_status(bead("a", 0), BeadStatus::Completed),
            with_status(bead("b", 0), BeadStatus::Completed),
        ])
        .expect("graph");
        let report = RunReport::from_graph(
            Strategy::AutoLoop,
            StopReason::at_exhaustion(&graph),
            2,
            &graph,
            Vec::new(),
        );
        assert_eq!(report.stop, StopReason::Drained);
        assert!(report.is_complete());
        assert_eq!(report.exit_code(), exit_codes::OK);
    }

    #[test]
    fn interrupted_beads_are_split_from_preexisting_in_progress() {
        let graph = Graph::build(vec![
            with_status(bead("a", 0), BeadStatus::InProgress),
            with_status(bead("b", 0), BeadStatus::InProgress),
        ])
        .expect("graph");
        let report = RunReport::from_graph(
            Strategy::Swarm,
            StopReason::Interrupted,
            1,
            &graph,
            vec!["b".to_string()],
        );
        assert_eq!(report.interrupted, vec!["b".to_string()]);
        assert_eq!(report.in_progress, vec!["a".to_string()]);
        assert_eq!(report.exit_code(), exit_codes::CANCELLED);
    }
}
