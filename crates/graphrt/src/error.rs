//! Error types raised by graph finalization and execution.
//!
//! Every error in this crate is a fail-fast contract violation: a missing backend, an unknown
//! or duplicate graph id, a rejected node or a missing tensor handle. Nothing is retried.

use thiserror::Error;

use crate::backend::spec::BackendError;
use crate::graph::{GraphId, NodeId, TensorId};
use crate::target::Target;

/// Coarse classification of a [`GraphError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A requested target or a node/tensor target has no registered backend.
    Configuration,
    /// `finalize` was called twice for the same graph id without an intervening invalidate.
    DuplicateRegistration,
    /// `execute`/`invalidate` on an id that is not currently finalized.
    UnknownGraph,
    /// A backend rejected a node's configuration.
    Validation,
    /// A structural invariant does not hold (e.g. a required tensor handle is absent).
    InvariantViolation,
    /// A backend, task or accessor failed while doing its work.
    Runtime,
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("no backend registered for target {target}")]
    MissingBackend { target: Target },
    #[error("no supported target is available")]
    NoSupportedTarget,
    #[error("invalid graph config: {0}")]
    Config(#[from] serde_json::Error),
    #[error("graph {id} is already registered")]
    AlreadyRegistered { id: GraphId },
    #[error("graph {id} is not registered")]
    NotRegistered { id: GraphId },
    #[error("validation of node '{node}' failed: {message}")]
    Validation { node: String, message: String },
    #[error("tensor handle is not configured for tensor {tensor}")]
    MissingHandle { tensor: TensorId },
    #[error("node {node} does not exist in graph {graph}")]
    MissingNode { graph: GraphId, node: NodeId },
    #[error("tensor {tensor} does not exist in graph {graph}")]
    MissingTensor { graph: GraphId, tensor: TensorId },
    #[error("invalid graph structure: {0}")]
    InvalidGraph(String),
    #[error("graph context is finalized and can no longer be modified")]
    ContextSealed,
    #[error("workload belongs to graph {expected}, got graph {actual}")]
    GraphMismatch { expected: GraphId, actual: GraphId },
    #[error("pass '{pass}' failed: {source}")]
    Pass {
        pass: &'static str,
        #[source]
        source: Box<GraphError>,
    },
    #[error("task for node '{node}' failed: {source}")]
    Task {
        node: String,
        #[source]
        source: BackendError,
    },
    #[error("accessor for tensor {tensor} failed: {source}")]
    Accessor {
        tensor: TensorId,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl GraphError {
    pub fn invalid_graph(message: impl Into<String>) -> Self {
        GraphError::InvalidGraph(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::MissingBackend { .. }
            | GraphError::NoSupportedTarget
            | GraphError::Config(_) => ErrorKind::Configuration,
            GraphError::AlreadyRegistered { .. } => ErrorKind::DuplicateRegistration,
            GraphError::NotRegistered { .. } => ErrorKind::UnknownGraph,
            GraphError::Validation { .. } => ErrorKind::Validation,
            GraphError::MissingHandle { .. }
            | GraphError::MissingNode { .. }
            | GraphError::MissingTensor { .. }
            | GraphError::InvalidGraph(_)
            | GraphError::ContextSealed
            | GraphError::GraphMismatch { .. } => ErrorKind::InvariantViolation,
            GraphError::Pass { source, .. } => source.kind(),
            GraphError::Task { .. } | GraphError::Accessor { .. } | GraphError::Backend(_) => {
                ErrorKind::Runtime
            }
        }
    }
}

/// Convenience alias for results returned by graph routines.
pub type GraphResult<T> = Result<T, GraphError>;
