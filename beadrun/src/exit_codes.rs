//! Stable exit codes for beadrun CLI commands.

/// Command succeeded; for strategies, every scoped bead is completed.
pub const OK: i32 = 0;
/// Invalid config, graph (cycle, missing dependency), store, or an illegal transition.
pub const INVALID: i32 = 1;
/// A strategy ended with blocked, unreachable, waiting, or undispatched beads.
pub const INCOMPLETE: i32 = 2;
/// A strategy was cancelled, hard-stopped, or stopped by the operator.
pub const CANCELLED: i32 = 3;
