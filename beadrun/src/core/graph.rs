//! In-memory dependency graph over a selected bead set.
//!
//! The graph is a snapshot: it is built from store contents once per run and
//! then kept current through [`Graph::record_status`] and
//! [`Graph::on_completed`] as the ledger applies transitions. Readiness is
//! tracked incrementally (unresolved dependency sets plus an ordered ready
//! set), so no tick ever rebuilds it from scratch.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use thiserror::Error;

use crate::core::types::{Bead, BeadId, BeadStatus};

/// Configuration errors detected while building the graph.
///
/// Any of these aborts a run before a single bead is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate bead id '{0}'")]
    DuplicateBead(BeadId),
    #[error("bead '{bead}' depends on unknown bead '{dependency}'")]
    MissingDependency { bead: BeadId, dependency: BeadId },
    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<BeadId>),
}

#[derive(Debug, Clone)]
struct GraphNode {
    bead: Bead,
    /// Dependencies not yet `completed`.
    unresolved: BTreeSet<BeadId>,
    /// Beads that list this one in `depends_on`.
    blocks: BTreeSet<BeadId>,
    /// Out-of-scope dependency: gates readiness, never dispatched.
    external: bool,
}

impl GraphNode {
    fn is_ready(&self) -> bool {
        !self.external && self.bead.status == BeadStatus::Pending && self.unresolved.is_empty()
    }

    fn ready_key(&self) -> ReadyKey {
        (self.bead.priority, self.bead.id.clone())
    }
}

/// Dispatch order: priority ascending, then id.
type ReadyKey = (u32, BeadId);

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: BTreeMap<BeadId, GraphNode>,
    ready: BTreeSet<ReadyKey>,
}

impl Graph {
    /// Build a graph where every bead is in scope.
    pub fn build(beads: Vec<Bead>) -> Result<Self, GraphError> {
        Self::build_scoped(beads, Vec::new())
    }

    /// Build a graph from in-scope beads plus out-of-scope dependencies.
    ///
    /// External beads only contribute their status; their own dependencies
    /// are not followed. Fails without building anything on duplicate ids,
    /// unknown dependencies, or a cycle.
    pub fn build_scoped(scope: Vec<Bead>, external: Vec<Bead>) -> Result<Self, GraphError> {
        let mut nodes = BTreeMap::new();
        let tagged = scope
            .into_iter()
            .map(|bead| (bead, false))
            .chain(external.into_iter().map(|bead| (bead, true)));
        for (bead, external) in tagged {
            let id = bead.id.clone();
            let node = GraphNode {
                bead,
                unresolved: BTreeSet::new(),
                blocks: BTreeSet::new(),
                external,
            };
            if nodes.insert(id.clone(), node).is_some() {
                return Err(GraphError::DuplicateBead(id));
            }
        }

        let mut edges: Vec<(BeadId, BeadId)> = Vec::new();
        for (id, node) in &nodes {
            if node.external {
                continue;
            }
            for dep in &node.bead.depends_on {
                if !nodes.contains_key(dep) {
                    return Err(GraphError::MissingDependency {
                        bead: id.clone(),
                        dependency: dep.clone(),
                    });
                }
                edges.push((id.clone(), dep.clone()));
            }
        }

        if let Some(cycle) = find_cycle(&nodes) {
            return Err(GraphError::Cycle(cycle));
        }

        for (id, dep) in edges {
            let dep_completed = nodes
                .get(&dep)
                .is_some_and(|node| node.bead.status == BeadStatus::Completed);
            if let Some(dep_node) = nodes.get_mut(&dep) {
                dep_node.blocks.insert(id.clone());
            }
            if !dep_completed {
                if let Some(node) = nodes.get_mut(&id) {
                    node.unresolved.insert(dep);
                }
            }
        }

        let ready = nodes
            .values()
            .filter(|node| node.is_ready())
            .map(GraphNode::ready_key)
            .collect();

        Ok(Self { nodes, ready })
    }

    pub fn get(&self, id: &str) -> Option<&Bead> {
        self.nodes.get(id).map(|node| &node.bead)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn is_external(&self, id: &str) -> bool {
        self.nodes.get(id).is_some_and(|node| node.external)
    }

    pub fn is_ready(&self, id: &str) -> bool {
        self.nodes.get(id).is_some_and(GraphNode::is_ready)
    }

    /// In-scope beads in id order.
    pub fn beads(&self) -> impl Iterator<Item = &Bead> {
        self.nodes
            .values()
            .filter(|node| !node.external)
            .map(|node| &node.bead)
    }

    /// Ids of beads that list `id` as a dependency.
    pub fn dependents(&self, id: &str) -> Vec<&BeadId> {
        self.nodes
            .get(id)
            .map(|node| node.blocks.iter().collect())
            .unwrap_or_default()
    }

    /// Pending in-scope beads whose dependencies are all completed, in dispatch order.
    pub fn ready(&self) -> Vec<&Bead> {
        self.ready
            .iter()
            .filter_map(|(_, id)| self.get(id))
            .collect()
    }

    /// Highest-priority ready bead, if any.
    pub fn next_ready(&self) -> Option<&Bead> {
        self.ready.first().and_then(|(_, id)| self.get(id))
    }

    /// Overwrite the snapshot status of `id` and keep the ready set consistent.
    ///
    /// This does not propagate completion to dependents; call
    /// [`Graph::on_completed`] after recording `completed`. Returns `false`
    /// when the bead is not part of the graph.
    pub fn record_status(&mut self, id: &str, status: BeadStatus, reason: Option<String>) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        self.ready.remove(&node.ready_key());
        node.bead.status = status;
        if reason.is_some() {
            node.bead.reason = reason;
        }
        if node.is_ready() {
            self.ready.insert(node.ready_key());
        }
        true
    }

    /// Resolve `id` for its dependents after it reached `completed`.
    ///
    /// Returns the beads whose last unresolved dependency was `id`, in
    /// dispatch order. Returns nothing if `id` is unknown or not completed.
    pub fn on_completed(&mut self, id: &str) -> Vec<Bead> {
        let dependents = match self.nodes.get(id) {
            Some(node) if node.bead.status == BeadStatus::Completed => node.blocks.clone(),
            _ => return Vec::new(),
        };

        let mut newly_ready = Vec::new();
        for dependent in dependents {
            let Some(node) = self.nodes.get_mut(&dependent) else {
                continue;
            };
            if node.unresolved.remove(id) && node.is_ready() {
                self.ready.insert(node.ready_key());
                newly_ready.push(node.bead.clone());
            }
        }
        newly_ready.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        newly_ready
    }

    /// Pending in-scope beads that can never become ready.
    ///
    /// A bead is unreachable when one of its unresolved dependencies is
    /// `blocked`, or is itself unreachable.
    pub fn unreachable(&self) -> Vec<&Bead> {
        let mut memo = HashMap::new();
        let mut beads: Vec<&Bead> = self
            .nodes
            .values()
            .filter(|node| !node.external && node.bead.status == BeadStatus::Pending)
            .filter(|node| self.doomed(&node.bead.id, &mut memo))
            .map(|node| &node.bead)
            .collect();
        sort_dispatch_order(&mut beads);
        beads
    }

    /// Pending in-scope beads that are neither ready nor unreachable.
    ///
    /// These wait on work this run does not drive: a dependency that is
    /// `in_progress` from an earlier run, or an external dependency that is
    /// not completed yet.
    pub fn waiting(&self) -> Vec<&Bead> {
        let mut memo = HashMap::new();
        let mut beads: Vec<&Bead> = self
            .nodes
            .values()
            .filter(|node| !node.external && node.bead.status == BeadStatus::Pending)
            .filter(|node| !node.unresolved.is_empty())
            .filter(|node| !self.doomed(&node.bead.id, &mut memo))
            .map(|node| &node.bead)
            .collect();
        sort_dispatch_order(&mut beads);
        beads
    }

    /// True when every in-scope bead is `completed`.
    pub fn all_completed(&self) -> bool {
        self.beads().all(|bead| bead.status == BeadStatus::Completed)
    }

    fn doomed<'a>(&'a self, id: &'a str, memo: &mut HashMap<&'a str, bool>) -> bool {
        if let Some(known) = memo.get(id) {
            return *known;
        }
        let Some(node) = self.nodes.get(id) else {
            return false;
        };
        let doomed = match node.bead.status {
            BeadStatus::Blocked => true,
            BeadStatus::Pending => node
                .unresolved
                .iter()
                .any(|dep| self.doomed(dep.as_str(), memo)),
            BeadStatus::InProgress | BeadStatus::Completed => false,
        };
        memo.insert(id, doomed);
        doomed
    }
}

fn sort_dispatch_order(beads: &mut [&Bead]) {
    beads.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Iterative depth-first search over dependency edges.
///
/// Returns the first cycle found as a closed path (`a -> b -> a`), starting
/// from the lowest id that reaches it.
fn find_cycle(nodes: &BTreeMap<BeadId, GraphNode>) -> Option<Vec<BeadId>> {
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    for (start, start_node) in nodes {
        if start_node.external || marks.contains_key(start.as_str()) {
            continue;
        }
        let mut path: Vec<&str> = vec![start.as_str()];
        let mut stack = vec![(start.as_str(), start_node.bead.depends_on.iter())];
        marks.insert(start.as_str(), Mark::Visiting);

        while let Some((id, deps)) = stack.last_mut() {
            let id = *id;
            let Some(dep) = deps.next() else {
                marks.insert(id, Mark::Done);
                path.pop();
                stack.pop();
                continue;
            };
            let Some(dep_node) = nodes.get(dep) else {
                continue;
            };
            if dep_node.external {
                continue;
            }
            match marks.get(dep.as_str()) {
                Some(Mark::Visiting) => {
                    let pos = path.iter().position(|seen| *seen == dep.as_str())?;
                    let mut cycle: Vec<BeadId> =
                        path.iter().skip(pos).map(|seen| seen.to_string()).collect();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                Some(Mark::Done) => {}
                None => {
                    marks.insert(dep.as_str(), Mark::Visiting);
                    path.push(dep.as_str());
                    stack.push((dep.as_str(), dep_node.bead.depends_on.iter()));
                }
            }
        }
    }

    None
}
