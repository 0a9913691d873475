//! TR-007: Error taxonomy for graph building, planning, state and execution.
//!
//! Build and plan errors are pure: they never leave persisted state behind.
//! Adapter errors carry a retry class; the executor records them in the
//! stack's state record instead of propagating them.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while assembling or freezing a resource graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("resource '{from}' property '{property}' references unknown resource '{target}'")]
    UnknownTarget {
        from: String,
        property: String,
        target: String,
    },

    #[error("unknown resource '{0}'")]
    UnknownResource(String),

    #[error("duplicate resource id '{0}'")]
    DuplicateResource(String),

    #[error("graph for stack '{0}' is frozen")]
    GraphFrozen(String),

    #[error("reference cycle: {}", .cycle.join(" -> "))]
    CyclicReference { cycle: Vec<String> },

    #[error("resource '{resource}' ({kind}) cannot carry policy statements")]
    PolicyNotAllowed { resource: String, kind: String },

    #[error("resource '{resource}': {message}")]
    Validation { resource: String, message: String },

    #[error("template error: {0}")]
    Template(String),

    #[error("unknown stack '{0}'")]
    UnknownStack(String),
}

/// Errors raised by the planner. All of them indicate a builder bug or
/// mismatched inputs; none are recoverable by retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("plan conflict on '{resource}': {reason}")]
    PlanConflict { resource: String, reason: String },

    #[error("desired graph is for stack '{desired}' but state is for '{recorded}'")]
    StackMismatch { desired: String, recorded: String },

    #[error("graph for stack '{0}' must be frozen before planning")]
    NotFrozen(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("cannot encode plan: {0}")]
    Encode(String),
}

/// Whether an adapter failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rate limiting, throttling, eventual-consistency races.
    Transient,
    /// Invalid configuration, missing permissions, unresolved inputs.
    Permanent,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// Failure reported by a provisioning adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{class} error: {message}")]
pub struct AdapterError {
    pub class: ErrorClass,
    pub message: String,
}

impl AdapterError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Transient
    }
}

/// State store failures.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid state file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("stack '{stack}' is locked by another apply ({holder})")]
    Locked { stack: String, holder: String },

    #[error("invalid stack name '{0}': use only letters, digits, '-' and '_'")]
    InvalidStackName(String),
}

/// Errors that abort an apply run before or between ops. Op failures are
/// not errors here: they are reported through the execution result.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("plan is for stack '{plan}' but state is for '{recorded}'")]
    StackMismatch { plan: String, recorded: String },

    #[error("state of stack '{0}' changed since the plan was computed; re-plan and try again")]
    StalePlan(String),

    #[error(transparent)]
    Plan(#[from] PlanError),
}
