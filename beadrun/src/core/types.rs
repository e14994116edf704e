//! Shared deterministic types for the scheduler core.
//!
//! These types define stable contracts between core components and the
//! store/executor adapters. They carry no I/O and serialize to a stable JSON
//! shape (snake_case statuses, kebab-case kinds).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Store-assigned bead identifier.
pub type BeadId = String;

/// Lifecycle status of a bead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeadStatus {
    Pending,
    InProgress,
    Blocked,
    Completed,
}

impl BeadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BeadStatus::Pending => "pending",
            BeadStatus::InProgress => "in_progress",
            BeadStatus::Blocked => "blocked",
            BeadStatus::Completed => "completed",
        }
    }

    /// `completed` and `blocked` end a bead's part in the current scheduling pass.
    pub fn is_terminal(self) -> bool {
        matches!(self, BeadStatus::Completed | BeadStatus::Blocked)
    }
}

impl fmt::Display for BeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BeadStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pending" => Ok(BeadStatus::Pending),
            "in_progress" => Ok(BeadStatus::InProgress),
            "blocked" => Ok(BeadStatus::Blocked),
            "completed" => Ok(BeadStatus::Completed),
            other => Err(format!(
                "unknown status '{other}' (expected pending, in_progress, blocked, completed)"
            )),
        }
    }
}

/// What kind of work a bead represents.
///
/// The kind does not change scheduling: an `impl` bead paired with a `test`
/// bead lists the test bead in `depends_on`, and readiness does the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BeadKind {
    Test,
    Impl,
    #[default]
    NonTestable,
}

impl BeadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BeadKind::Test => "test",
            BeadKind::Impl => "impl",
            BeadKind::NonTestable => "non-testable",
        }
    }
}

impl fmt::Display for BeadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BeadKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "test" => Ok(BeadKind::Test),
            "impl" => Ok(BeadKind::Impl),
            "non-testable" => Ok(BeadKind::NonTestable),
            other => Err(format!(
                "unknown kind '{other}' (expected test, impl, non-testable)"
            )),
        }
    }
}

/// An atomic, dependency-aware unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bead {
    pub id: BeadId,
    pub title: String,
    #[serde(default)]
    pub kind: BeadKind,
    pub status: BeadStatus,
    #[serde(default)]
    pub depends_on: BTreeSet<BeadId>,
    /// Lower value runs first among ready beads.
    #[serde(default)]
    pub priority: u32,
    /// Opaque to the scheduler; handed to the executor untouched.
    #[serde(default)]
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<BeadId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Detail recorded with the last status transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Fields supplied by whoever creates a bead; the store assigns id and status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewBead {
    pub title: String,
    pub kind: BeadKind,
    pub priority: u32,
    pub payload: String,
    pub parent_id: Option<BeadId>,
    pub group: Option<String>,
    pub depends_on: BTreeSet<BeadId>,
}

/// Outcome classification reported by the worker substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Success,
    Failure,
}

/// Structured result of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub outcome: ExecutionOutcome,
    pub detail: String,
}

impl ExecutionResult {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            outcome: ExecutionOutcome::Success,
            detail: detail.into(),
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            outcome: ExecutionOutcome::Failure,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ExecutionOutcome::Success
    }
}
