//! Bead lifecycle transition table.
//!
//! ```text
//! pending --start--> in_progress --complete--> completed
//!                        |  ^
//!                   fail |  | release (operator)
//!                        v  |
//!                      blocked --retry (operator)--> pending
//! ```
//!
//! Every transition has exactly one legal source status. Anything else is an
//! invariant violation and is reported, never ignored.

use std::fmt;

use thiserror::Error;

use crate::core::types::{BeadId, BeadStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Complete,
    Fail,
    /// Operator-only: `blocked -> pending`.
    Retry,
    /// Operator-only: `in_progress -> pending`, for work abandoned by a hard stop.
    Release,
}

impl Transition {
    pub fn from_status(self) -> BeadStatus {
        match self {
            Transition::Start => BeadStatus::Pending,
            Transition::Complete | Transition::Fail | Transition::Release => {
                BeadStatus::InProgress
            }
            Transition::Retry => BeadStatus::Blocked,
        }
    }

    pub fn to_status(self) -> BeadStatus {
        match self {
            Transition::Start => BeadStatus::InProgress,
            Transition::Complete => BeadStatus::Completed,
            Transition::Fail => BeadStatus::Blocked,
            Transition::Retry | Transition::Release => BeadStatus::Pending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Complete => "complete",
            Transition::Fail => "fail",
            Transition::Retry => "retry",
            Transition::Release => "release",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempted transition from the wrong status (double start, double complete, ...).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal {transition} of bead '{bead}': status is {actual}, expected {expected}")]
pub struct TransitionError {
    pub bead: BeadId,
    pub transition: Transition,
    pub expected: BeadStatus,
    pub actual: BeadStatus,
}

/// Validate `transition` against `current` and return the resulting status.
pub fn check(
    bead: &str,
    current: BeadStatus,
    transition: Transition,
) -> Result<BeadStatus, TransitionError> {
    let expected = transition.from_status();
    if current != expected {
        return Err(TransitionError {
            bead: bead.to_string(),
            transition,
            expected,
            actual: current,
        });
    }
    Ok(transition.to_status())
}
