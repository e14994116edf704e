//! I/O adapters: bead stores, the worker substrate, config, and the operator channel.

pub mod config;
pub mod executor;
pub mod file_store;
pub mod init;
pub mod memory_store;
pub mod operator;
pub mod process;
pub mod store;
