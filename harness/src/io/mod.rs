//! Side-effecting operations: filesystem, git, child processes, network.

pub mod agents;
pub mod artifacts;
pub mod augment;
pub mod capture;
pub mod cleanup;
pub mod clone;
pub mod config;
pub mod git;
pub mod process;
pub mod provision;
pub mod tasks;
