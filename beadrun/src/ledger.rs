//! Applies lifecycle transitions through the store and keeps the graph in step.
//!
//! Schedulers never write statuses directly. Each transition is validated
//! against the graph snapshot, then written with a compare-and-set on the
//! store, then mirrored into the graph. A store conflict means someone else
//! moved the bead and is reported as a [`TransitionError`].

use anyhow::{Result, anyhow};
use tracing::{debug, info, warn};

use crate::core::graph::Graph;
use crate::core::lifecycle::{Transition, TransitionError, check};
use crate::core::types::{Bead, BeadStatus};
use crate::io::store::{BeadStore, StoreError};

pub struct Ledger<'a, S: BeadStore + ?Sized> {
    store: &'a S,
    graph: Graph,
}

impl<'a, S: BeadStore + ?Sized> Ledger<'a, S> {
    pub fn new(store: &'a S, graph: Graph) -> Self {
        Self { store, graph }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    /// Highest-priority ready bead, cloned so the ledger can be mutated while it runs.
    pub fn next_ready(&self) -> Option<Bead> {
        self.graph.next_ready().cloned()
    }

    /// `pending -> in_progress`. Fails loudly on a double start.
    pub fn start(&mut self, id: &str) -> Result<Bead> {
        self.apply(id, Transition::Start, None)
    }

    /// `in_progress -> completed`. Returns dependents that just became ready.
    pub fn complete(&mut self, id: &str, reason: &str) -> Result<Vec<Bead>> {
        self.apply(id, Transition::Complete, Some(reason))?;
        let newly_ready = self.graph.on_completed(id);
        info!(id, newly_ready = newly_ready.len(), "bead completed");
        Ok(newly_ready)
    }

    /// `in_progress -> blocked`, recording why.
    pub fn fail(&mut self, id: &str, reason: &str) -> Result<()> {
        self.apply(id, Transition::Fail, Some(reason))?;
        warn!(id, reason, "bead blocked");
        Ok(())
    }

    /// Operator `blocked -> pending`.
    pub fn retry(&mut self, id: &str) -> Result<()> {
        self.apply(id, Transition::Retry, Some("retried by operator"))?;
        Ok(())
    }

    /// Operator `in_progress -> pending`.
    pub fn release(&mut self, id: &str) -> Result<()> {
        self.apply(id, Transition::Release, Some("released by operator"))?;
        Ok(())
    }

    fn apply(&mut self, id: &str, transition: Transition, reason: Option<&str>) -> Result<Bead> {
        let current = match self.graph.get(id) {
            Some(_) if self.graph.is_external(id) => {
                return Err(anyhow!("bead '{id}' is outside this run's scope"));
            }
            Some(bead) => bead.status,
            None => return Err(anyhow!("bead '{id}' is not part of this run")),
        };
        let updated = store_transition(self.store, id, current, transition, reason)?;
        self.graph
            .record_status(id, updated.status, updated.reason.clone());
        debug!(id, %transition, status = %updated.status, "transition applied");
        Ok(updated)
    }
}

/// Apply an operator transition directly against the store, without a graph.
pub fn apply_transition<S: BeadStore + ?Sized>(
    store: &S,
    id: &str,
    transition: Transition,
    reason: Option<&str>,
) -> Result<Bead> {
    let current = store.get(id)?.status;
    store_transition(store, id, current, transition, reason)
}

fn store_transition<S: BeadStore + ?Sized>(
    store: &S,
    id: &str,
    current: BeadStatus,
    transition: Transition,
    reason: Option<&str>,
) -> Result<Bead> {
    let next = check(id, current, transition)?;
    let expected = transition.from_status();
    match store.update_status(id, expected, next, reason) {
        Ok(bead) => Ok(bead),
        Err(StoreError::StatusConflict { actual, .. }) => Err(TransitionError {
            bead: id.to_string(),
            transition,
            expected,
            actual,
        }
        .into()),
        Err(err) => Err(anyhow::Error::new(err).context(format!("{transition} bead '{id}'"))),
    }
}
