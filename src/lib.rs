//! Terrace: declarative resource-graph compiler.
//!
//! Resource definitions become a frozen dependency graph, the graph and the
//! last recorded state become a deterministic change plan, and the plan is
//! applied op by op through a provisioning adapter with resumable state.

pub mod adapter;
pub mod cli;
pub mod core;
pub mod resources;
pub mod stacks;
pub mod tripwire;
