//! Deterministic, pure logic shared by the scheduler.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod graph;
pub mod lifecycle;
pub mod types;
