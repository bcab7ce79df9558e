//! Error types for graph construction and execution.
//!
//! Every condition the engine can detect is reported as a [`GraphError`].
//! None of them is transient: they signal a malformed graph or a misuse of
//! the query interface, so callers are expected to fix the cause rather than
//! retry.

use std::fmt;
use thiserror::Error;

/// The two kinds of vertices held by a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeKind {
    /// A value node (holds a tensor, optionally a gradient).
    Value,
    /// An operation node (computes outputs from operands).
    Operation,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value => f.write_str("value"),
            Self::Operation => f.write_str("operation"),
        }
    }
}

/// Coarse classification of a [`GraphError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Duplicate names or malformed edges while building the graph.
    Registration,
    /// A query named a node that was never registered.
    Lookup,
    /// A node needed by the query has no valid value.
    Readiness,
    /// Backward was seeded from a node it cannot start from.
    TopologyMisuse,
    /// Pass state does not match the current graph.
    Consistency,
    /// An execution mode that is recognised but not implemented.
    UnsupportedMode,
    /// An operation's forward or backward contract failed.
    Operation,
}

/// Errors that can occur while building or executing a graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A node with the same name is already registered.
    #[error("{kind} {name} is already inserted")]
    DuplicateNode {
        /// Kind of the node being registered
        kind: NodeKind,
        /// Offending name
        name: String,
    },

    /// A name does not resolve to a registered node.
    #[error("{kind} {name} is not registered")]
    UnregisteredNode {
        /// Kind of node that was looked up
        kind: NodeKind,
        /// Name that failed to resolve
        name: String,
    },

    /// An operation's declared edges are unusable.
    #[error("invalid operation {name}: {reason}")]
    InvalidOperation {
        /// Name of the operation being registered
        name: String,
        /// Description of the problem
        reason: String,
    },

    /// A node that must hold a value for this pass does not.
    #[error("required variable {name} is not ready")]
    NodeNotReady {
        /// Name of the value node
        name: String,
    },

    /// Backward was seeded from a node that still has consumers.
    #[error("only allow backprop from top variables: {name} has {consumers} consumer(s)")]
    NotASink {
        /// Name of the seed
        name: String,
        /// Number of registered consumer operations
        consumers: usize,
    },

    /// Backward was seeded from a constant node.
    #[error("cannot calc grad for const variable {name}")]
    ConstantSeed {
        /// Name of the seed
        name: String,
    },

    /// The pass state handed to backward does not describe the current graph.
    #[error("unexpected change of computation graph in backward stage: {reason}")]
    InconsistentPass {
        /// Description of the mismatch
        reason: String,
    },

    /// Only single-threaded execution is implemented.
    #[error("execution with {threads} threads is not implemented")]
    UnsupportedMode {
        /// Requested thread count
        threads: usize,
    },

    /// An operation's forward or backward evaluation failed.
    #[error("operation {operation} failed: {reason}")]
    OperationFailed {
        /// Name of the operation
        operation: String,
        /// Description of the failure
        reason: String,
    },

    /// A gradient contribution does not match the accumulator's shape.
    #[error("gradient shape mismatch at {name}: expected {expected:?}, got {actual:?}")]
    GradientShapeMismatch {
        /// Name of the value node receiving the gradient
        name: String,
        /// Shape of the accumulator
        expected: (usize, usize),
        /// Shape of the contribution
        actual: (usize, usize),
    },
}

impl GraphError {
    /// Create a DuplicateNode error.
    pub fn duplicate<S: Into<String>>(kind: NodeKind, name: S) -> Self {
        Self::DuplicateNode {
            kind,
            name: name.into(),
        }
    }

    /// Create an UnregisteredNode error.
    pub fn unregistered<S: Into<String>>(kind: NodeKind, name: S) -> Self {
        Self::UnregisteredNode {
            kind,
            name: name.into(),
        }
    }

    /// Create an InvalidOperation error.
    pub fn invalid_operation<S1, S2>(name: S1, reason: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::InvalidOperation {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a NodeNotReady error.
    pub fn not_ready<S: Into<String>>(name: S) -> Self {
        Self::NodeNotReady { name: name.into() }
    }

    /// Create an InconsistentPass error.
    pub fn inconsistent_pass<S: Into<String>>(reason: S) -> Self {
        Self::InconsistentPass {
            reason: reason.into(),
        }
    }

    /// Create an OperationFailed error.
    pub fn operation_failed<S1, S2>(operation: S1, reason: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::OperationFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Returns the class this error belongs to.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateNode { .. } | Self::InvalidOperation { .. } => ErrorClass::Registration,
            Self::UnregisteredNode { .. } => ErrorClass::Lookup,
            Self::NodeNotReady { .. } => ErrorClass::Readiness,
            Self::NotASink { .. } | Self::ConstantSeed { .. } => ErrorClass::TopologyMisuse,
            Self::InconsistentPass { .. } => ErrorClass::Consistency,
            Self::UnsupportedMode { .. } => ErrorClass::UnsupportedMode,
            Self::OperationFailed { .. } | Self::GradientShapeMismatch { .. } => {
                ErrorClass::Operation
            }
        }
    }
}

/// Result type alias for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;
