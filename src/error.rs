//! Error taxonomy of the engine.
//!
//! Ordinary runtime failure is *not* represented here; that is
//! [`NodeStatus::Failure`](crate::NodeStatus) and flows through the status
//! lattice. The types below cover construction-time configuration errors
//! and contract violations, both of which abort the tick.

use thiserror::Error;

use crate::NodeStatus;

/// The outcome of ticking a node: a status, or a fatal engine error.
pub type NodeResult = Result<NodeStatus, BehaviorError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BehaviorError {
    /// A node's `tick` returned `Idle`, which only `reset_status` may
    /// produce. This is a bug in the node implementation.
    #[error("[{0}]: a node must not return IDLE from its tick")]
    TickReturnedIdle(String),

    /// A synchronous action returned `Running`.
    #[error("[{0}]: a synchronous action must never return RUNNING")]
    SyncActionRunning(String),

    /// Two different children of a reactive control node reported
    /// `Running` within the same pass.
    #[error("[{0}]: only a single child of a reactive node can return RUNNING")]
    MultipleRunningChildren(String),

    #[error("[{node}]: expected {expected} children, found {actual}")]
    ChildCountMismatch {
        node: String,
        expected: &'static str,
        actual: usize,
    },

    /// A control or decorator algorithm addressed a child slot that was
    /// never filled.
    #[error("[{0}]: missing child at index {1}")]
    MissingChild(String, usize),

    #[error("[{node}]: attempted to set the status to IDLE; use reset_status() instead")]
    SetStatusIdle { node: String },

    #[error("node type {0:?} is not registered")]
    UnknownNodeType(String),

    #[error("failed to spawn the worker thread: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Blackboard(#[from] BlackboardError),

    #[error(transparent)]
    AddChild(#[from] AddChildError),
}

/// Failures of the port-access contract exposed to leaf authors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PortError {
    #[error("[{node}]: port [{port}] is not declared or bound")]
    MissingPort { node: String, port: String },

    #[error("[{node}]: port [{port}] refers to blackboard key [{key}] which does not exist")]
    UnresolvedReference {
        node: String,
        port: String,
        key: String,
    },

    #[error("[{node}]: port [{port}] is not an output port")]
    NotAnOutputPort { node: String, port: String },

    #[error("[{node}]: output port [{port}] is bound to a literal; use a {{key}} reference")]
    OutputToLiteral { node: String, port: String },

    #[error("[{node}]: port [{port}] holds [{value}] which cannot be converted to {wanted}")]
    Conversion {
        node: String,
        port: String,
        value: String,
        wanted: &'static str,
    },

    #[error(transparent)]
    Blackboard(#[from] BlackboardError),
}

/// Violations of the blackboard's type-consistency rule.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BlackboardError {
    #[error(
        "entry [{key}] was created with type {expected} and cannot accept a value of type {actual}"
    )]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("entry [{key}] holds the string [{value}] which does not parse as {expected}")]
    StringConversion {
        key: String,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AddChildError {
    #[error("attempted to add too many child nodes")]
    TooManyNodes,
}

pub type AddChildResult = Result<(), AddChildError>;
