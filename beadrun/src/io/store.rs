//! Bead store contract.
//!
//! The scheduler only needs a narrow surface from whatever holds beads:
//! create, get, list by filter, status updates, and dependency edges. Status
//! updates are compare-and-set on the expected current status so that two
//! workers can never both claim the same bead.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{Bead, BeadId, BeadStatus, NewBead};

pub const DEFAULT_ID_PREFIX: &str = "bd";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bead '{0}' not found")]
    NotFound(BeadId),
    #[error("bead '{id}' status is {actual}, expected {expected}")]
    StatusConflict {
        id: BeadId,
        expected: BeadStatus,
        actual: BeadStatus,
    },
    #[error("bead '{0}' cannot depend on itself")]
    SelfDependency(BeadId),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Predicates for [`BeadStore::list`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BeadFilter {
    pub group: Option<String>,
    pub status: Option<BeadStatus>,
    pub parent_id: Option<BeadId>,
}

impl BeadFilter {
    pub fn matches(&self, bead: &Bead) -> bool {
        if let Some(group) = &self.group {
            if bead.group.as_ref() != Some(group) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if bead.status != status {
                return false;
            }
        }
        if let Some(parent) = &self.parent_id {
            if bead.parent_id.as_ref() != Some(parent) {
                return false;
            }
        }
        true
    }
}

pub trait BeadStore {
    /// Insert a new `pending` bead and return its assigned id.
    fn create(&self, bead: NewBead) -> StoreResult<BeadId>;

    fn get(&self, id: &str) -> StoreResult<Bead>;

    /// Matching beads in id order.
    fn list(&self, filter: &BeadFilter) -> StoreResult<Vec<Bead>>;

    /// Move `id` from `expected` to `next`, recording `reason` when given.
    ///
    /// Fails with [`StoreError::StatusConflict`] if the stored status is not
    /// `expected`; nothing is written in that case.
    fn update_status(
        &self,
        id: &str,
        expected: BeadStatus,
        next: BeadStatus,
        reason: Option<&str>,
    ) -> StoreResult<Bead>;

    /// Close an in-progress bead as completed.
    fn close(&self, id: &str, reason: &str) -> StoreResult<Bead> {
        self.update_status(id, BeadStatus::InProgress, BeadStatus::Completed, Some(reason))
    }

    /// Record that `id` depends on `depends_on`.
    fn add_dependency(&self, id: &str, depends_on: &str) -> StoreResult<()>;
}

/// Serializable bead collection shared by the in-memory and file stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeadSet {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Next numeric suffix handed out by `create`.
    pub next_id: u64,
    /// Kept sorted by id.
    pub beads: Vec<Bead>,
}

fn default_prefix() -> String {
    DEFAULT_ID_PREFIX.to_string()
}

impl Default for BeadSet {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            next_id: 1,
            beads: Vec::new(),
        }
    }
}

impl BeadSet {
    /// Seed a set with fully-formed beads (ids included).
    pub fn with_beads(beads: Vec<Bead>) -> Self {
        let mut set = Self {
            beads,
            ..Self::default()
        };
        set.beads.sort_by(|a, b| a.id.cmp(&b.id));
        set
    }

    pub fn create(&mut self, new: NewBead) -> StoreResult<BeadId> {
        for dep in &new.depends_on {
            if self.position(dep).is_none() {
                return Err(StoreError::NotFound(dep.clone()));
            }
        }
        if let Some(parent) = &new.parent_id {
            if self.position(parent).is_none() {
                return Err(StoreError::NotFound(parent.clone()));
            }
        }

        let id = loop {
            let candidate = format!("{}-{}", self.prefix, self.next_id);
            self.next_id = self.next_id.saturating_add(1);
            if self.position(&candidate).is_none() {
                break candidate;
            }
        };

        self.beads.push(Bead {
            id: id.clone(),
            title: new.title,
            kind: new.kind,
            status: BeadStatus::Pending,
            depends_on: new.depends_on,
            priority: new.priority,
            payload: new.payload,
            parent_id: new.parent_id,
            group: new.group,
            reason: None,
        });
        self.beads.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(id)
    }

    pub fn get(&self, id: &str) -> StoreResult<Bead> {
        self.position(id)
            .and_then(|pos| self.beads.get(pos))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn list(&self, filter: &BeadFilter) -> Vec<Bead> {
        self.beads
            .iter()
            .filter(|bead| filter.matches(bead))
            .cloned()
            .collect()
    }

    pub fn update_status(
        &mut self,
        id: &str,
        expected: BeadStatus,
        next: BeadStatus,
        reason: Option<&str>,
    ) -> StoreResult<Bead> {
        let bead = self.get_mut(id)?;
        if bead.status != expected {
            return Err(StoreError::StatusConflict {
                id: id.to_string(),
                expected,
                actual: bead.status,
            });
        }
        bead.status = next;
        if let Some(reason) = reason {
            bead.reason = Some(reason.to_string());
        }
        Ok(bead.clone())
    }

    pub fn add_dependency(&mut self, id: &str, depends_on: &str) -> StoreResult<()> {
        if id == depends_on {
            return Err(StoreError::SelfDependency(id.to_string()));
        }
        if self.position(depends_on).is_none() {
            return Err(StoreError::NotFound(depends_on.to_string()));
        }
        let bead = self.get_mut(id)?;
        bead.depends_on.insert(depends_on.to_string());
        Ok(())
    }

    /// Ids referenced as dependencies but missing from the set.
    pub fn dangling_dependencies(&self) -> BTreeSet<BeadId> {
        self.beads
            .iter()
            .flat_map(|bead| bead.depends_on.iter())
            .filter(|dep| self.position(dep).is_none())
            .cloned()
            .collect()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.beads
            .binary_search_by(|bead| bead.id.as_str().cmp(id))
            .ok()
    }

    fn get_mut(&mut self, id: &str) -> StoreResult<&mut Bead> {
        match self.position(id) {
            Some(pos) => self
                .beads
                .get_mut(pos)
                .ok_or_else(|| StoreError::NotFound(id.to_string())),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }
}
