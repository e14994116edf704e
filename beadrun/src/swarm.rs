//! Worker pool strategy: up to `max_workers` beads in flight at once.
//!
//! Everything runs on one scheduling task. Units of work race in a
//! `FuturesUnordered`; whichever resolves first is recorded, the freed slot
//! is refilled from the ready set, and the loop continues. All status
//! mutation happens here, between awaits, through the [`Ledger`].

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::{Result, anyhow};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tracing::{debug, info, instrument};

use crate::cancel::CancellationCoordinator;
use crate::core::graph::Graph;
use crate::core::types::{Bead, BeadId, ExecutionResult};
use crate::io::executor::Executor;
use crate::io::store::BeadStore;
use crate::ledger::Ledger;
use crate::report::{Resolution, RunEvent, RunReport, StopReason, Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwarmConfig {
    pub max_workers: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self { max_workers: 3 }
    }
}

/// An active unit of work and the bead it executes.
#[derive(Debug)]
struct WorkerSlot {
    title: String,
    started_at: Instant,
}

/// Drive the graph with a pool of concurrent workers until nothing is ready
/// and nothing is in flight, or until cancelled.
///
/// A failed unit blocks its bead and the pool carries on. Illegal
/// transitions abort the run with a [`crate::core::lifecycle::TransitionError`].
#[instrument(skip_all, fields(max_workers = config.max_workers))]
pub async fn run_swarm<S, E, F>(
    store: &S,
    graph: Graph,
    executor: &E,
    config: &SwarmConfig,
    cancel: &CancellationCoordinator,
    mut on_event: F,
) -> Result<RunReport>
where
    S: BeadStore + ?Sized,
    E: Executor,
    F: FnMut(&RunEvent),
{
    if config.max_workers == 0 {
        return Err(anyhow!("max_workers must be > 0"));
    }

    let mut ledger = Ledger::new(store, graph);
    let mut slots: BTreeMap<BeadId, WorkerSlot> = BTreeMap::new();
    let mut active = FuturesUnordered::new();
    let mut dispatched = 0usize;

    let stop = loop {
        if cancel.is_stopped_now() {
            break StopReason::Interrupted;
        }

        if !cancel.is_cancelled() {
            while slots.len() < config.max_workers {
                let Some(next) = ledger.next_ready() else {
                    break;
                };
                let bead = ledger.start(&next.id)?;
                info!(
                    id = %bead.id,
                    title = %bead.title,
                    in_flight = slots.len() + 1,
                    "dispatching bead"
                );
                on_event(&RunEvent::Dispatched {
                    bead_id: bead.id.clone(),
                    title: bead.title.clone(),
                });
                slots.insert(
                    bead.id.clone(),
                    WorkerSlot {
                        title: bead.title.clone(),
                        started_at: Instant::now(),
                    },
                );
                dispatched += 1;
                active.push(run_unit(executor, bead));
            }
        }

        if slots.is_empty() {
            // A cancel only shapes the outcome if it held back ready work.
            let held_back = !ledger.graph().ready().is_empty();
            break if cancel.is_cancelled() && held_back {
                StopReason::Cancelled
            } else {
                StopReason::at_exhaustion(ledger.graph())
            };
        }

        let resolved = tokio::select! {
            biased;
            () = cancel.stopped_now() => continue,
            next = active.next() => next,
        };
        let Some((bead_id, result)) = resolved else {
            return Err(anyhow!("{} worker slots have no running unit", slots.len()));
        };
        let slot = slots
            .remove(&bead_id)
            .ok_or_else(|| anyhow!("unit resolved for unknown slot '{bead_id}'"))?;
        debug!(
            id = %bead_id,
            elapsed_ms = slot.started_at.elapsed().as_millis() as u64,
            success = result.is_success(),
            "unit resolved"
        );

        if result.is_success() {
            let newly_ready = ledger.complete(&bead_id, &result.detail)?;
            debug!(id = %bead_id, newly_ready = newly_ready.len(), "dependents unlocked");
        } else {
            ledger.fail(&bead_id, &result.detail)?;
        }
        on_event(&RunEvent::Resolved(Resolution {
            bead_id,
            title: slot.title,
            result,
        }));
    };

    let interrupted: Vec<BeadId> = slots.into_keys().collect();
    if !interrupted.is_empty() {
        info!(?interrupted, "hard stop left beads in progress");
    }
    Ok(RunReport::from_graph(
        Strategy::Swarm,
        stop,
        dispatched,
        ledger.graph(),
        interrupted,
    ))
}

async fn run_unit<E: Executor>(executor: &E, bead: Bead) -> (BeadId, ExecutionResult) {
    let id = bead.id.clone();
    let result = executor.execute(bead).await;
    (id, result)
}
