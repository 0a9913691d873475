//! Core graph logic: types, parsing, building, planning, execution.

pub mod builder;
pub mod cancel;
pub mod error;
pub mod executor;
pub mod graph;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod retry;
pub mod state;
pub mod types;
