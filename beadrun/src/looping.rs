//! Sequential strategies for `beadrun loop` and `beadrun auto-loop`.
//!
//! One bead at a time, always the highest-priority ready bead unless the
//! operator jumps elsewhere. The stepped mode consults an [`Operator`] after
//! every bead; the auto mode never asks and leaves failed beads blocked.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::cancel::CancellationCoordinator;
use crate::core::graph::Graph;
use crate::core::types::BeadId;
use crate::io::executor::Executor;
use crate::io::operator::{FailureDecision, Operator, StepDecision};
use crate::io::store::BeadStore;
use crate::ledger::Ledger;
use crate::report::{Resolution, RunEvent, RunReport, StopReason, Strategy};

/// Whether an operator confirms between beads.
pub enum LoopMode<'o> {
    Stepped(&'o mut dyn Operator),
    Auto,
}

impl LoopMode<'_> {
    fn strategy(&self) -> Strategy {
        match self {
            LoopMode::Stepped(_) => Strategy::Loop,
            LoopMode::Auto => Strategy::AutoLoop,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopConfig {
    /// Stop after dispatching this many beads in one invocation.
    pub max_steps: Option<usize>,
}

/// Run ready beads one at a time until none is ready, the operator stops,
/// the step limit is hit, or cancellation is requested.
///
/// Stops immediately on any error (store, illegal transition, operator I/O).
#[instrument(skip_all, fields(max_steps = ?config.max_steps))]
pub async fn run_loop<S, E, F>(
    store: &S,
    graph: Graph,
    executor: &E,
    mut mode: LoopMode<'_>,
    config: &LoopConfig,
    cancel: &CancellationCoordinator,
    mut on_event: F,
) -> Result<RunReport>
where
    S: BeadStore + ?Sized,
    E: Executor,
    F: FnMut(&RunEvent),
{
    let strategy = mode.strategy();
    let mut ledger = Ledger::new(store, graph);
    let mut dispatched = 0usize;
    let mut interrupted: Vec<BeadId> = Vec::new();
    let mut jump_target: Option<BeadId> = None;

    let stop = 'run: loop {
        let next = match jump_target.take() {
            Some(id) => ledger.graph().get(&id).cloned(),
            None => ledger.next_ready(),
        };
        let Some(next) = next else {
            break StopReason::at_exhaustion(ledger.graph());
        };
        if cancel.is_cancelled() {
            break StopReason::Cancelled;
        }
        if config.max_steps.is_some_and(|max| dispatched >= max) {
            break StopReason::StepLimit;
        }

        let bead = ledger.start(&next.id)?;
        dispatched += 1;
        info!(id = %bead.id, title = %bead.title, step = dispatched, "running bead");
        on_event(&RunEvent::Dispatched {
            bead_id: bead.id.clone(),
            title: bead.title.clone(),
        });

        let bead_id = bead.id.clone();
        let title = bead.title.clone();
        let result = tokio::select! {
            biased;
            () = cancel.stopped_now() => {
                interrupted.push(bead_id);
                break 'run StopReason::Interrupted;
            }
            result = executor.execute(bead) => result,
        };

        if result.is_success() {
            ledger.complete(&bead_id, &result.detail)?;
        } else {
            ledger.fail(&bead_id, &result.detail)?;
        }
        let resolution = Resolution {
            bead_id,
            title,
            result,
        };
        on_event(&RunEvent::Resolved(resolution.clone()));

        let LoopMode::Stepped(operator) = &mut mode else {
            continue;
        };
        if cancel.is_cancelled() {
            continue;
        }

        // Prompts block on the operator; a cancel that arrived meanwhile wins
        // over the answer.
        if !resolution.is_success() {
            let decision = operator.on_failure(&resolution)?;
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            match decision {
                FailureDecision::Retry => {
                    ledger.retry(&resolution.bead_id)?;
                    jump_target = Some(resolution.bead_id.clone());
                    continue;
                }
                FailureDecision::Skip => {}
                FailureDecision::Stop => break StopReason::OperatorStopped,
            }
        }

        loop {
            let ready: Vec<_> = ledger.graph().ready().into_iter().cloned().collect();
            if ready.is_empty() {
                break;
            }
            let decision = operator.after_step(&resolution, &ready)?;
            if cancel.is_cancelled() {
                break 'run StopReason::Cancelled;
            }
            match decision {
                StepDecision::Continue => break,
                StepDecision::Stop => break 'run StopReason::OperatorStopped,
                StepDecision::JumpTo(id) if ledger.graph().is_ready(&id) => {
                    jump_target = Some(id);
                    break;
                }
                StepDecision::JumpTo(id) => {
                    warn!(id = %id, "jump target is not ready; asking again");
                }
            }
        }
    };

    Ok(RunReport::from_graph(
        strategy,
        stop,
        dispatched,
        ledger.graph(),
        interrupted,
    ))
}
