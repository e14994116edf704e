//! Dependency-aware bead scheduler.
//!
//! A set of atomic work items ("beads") with declared dependencies is driven
//! to completion by one of three strategies: a concurrent worker pool
//! ([`swarm`]), an operator-confirmed stepped loop, or an unattended loop
//! ([`looping`]). The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (dependency graph, lifecycle
//!   transition table). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (bead stores, process execution,
//!   config, operator prompts). Isolated behind traits so tests can script them.
//!
//! Orchestration modules ([`ledger`], [`scope`], [`swarm`], [`looping`],
//! [`cancel`], [`report`]) coordinate core logic with I/O to implement the CLI.

pub mod cancel;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod ledger;
pub mod logging;
pub mod looping;
pub mod report;
pub mod scope;
pub mod swarm;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
