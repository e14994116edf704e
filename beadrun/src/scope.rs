//! Turn a store filter into a dependency graph for one run.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::graph::{Graph, GraphError};
use crate::core::types::BeadId;
use crate::io::store::{BeadFilter, BeadStore, StoreError};

/// Load the beads matching `filter` and build their graph.
///
/// Dependencies that fall outside the filter are fetched individually and
/// added as external nodes: they gate readiness but are never dispatched. A
/// dependency the store does not know is a [`GraphError::MissingDependency`].
pub fn load_graph<S: BeadStore + ?Sized>(store: &S, filter: &BeadFilter) -> Result<Graph> {
    let scope = store.list(filter).context("list beads")?;
    let in_scope: BTreeSet<BeadId> = scope.iter().map(|bead| bead.id.clone()).collect();

    let mut fetched = BTreeSet::new();
    let mut external = Vec::new();
    for bead in &scope {
        for dep in &bead.depends_on {
            if in_scope.contains(dep) || !fetched.insert(dep.clone()) {
                continue;
            }
            match store.get(dep) {
                Ok(found) => external.push(found),
                Err(StoreError::NotFound(_)) => {
                    return Err(GraphError::MissingDependency {
                        bead: bead.id.clone(),
                        dependency: dep.clone(),
                    }
                    .into());
                }
                Err(err) => {
                    return Err(anyhow::Error::new(err).context(format!("load dependency '{dep}'")));
                }
            }
        }
    }

    debug!(
        scoped = scope.len(),
        external = external.len(),
        "building dependency graph"
    );
    Ok(Graph::build_scoped(scope, external)?)
}
