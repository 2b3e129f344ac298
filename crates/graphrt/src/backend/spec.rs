use std::sync::Arc;

use thiserror::Error;

use crate::context::{GraphContext, MemoryManagerContext};
use crate::error::GraphResult;
use crate::graph::{Graph, Node, Tensor};
use crate::memory::MemoryGroup;
use crate::target::Target;
use crate::tensor::SharedTensorHandle;

/// Errors reported by backend routines.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{op} is not supported: {reason}")]
    Unsupported { op: String, reason: String },
    #[error("backend execution failure: {message}")]
    Execution { message: String },
    #[error("backend allocation failure: {message}")]
    Allocation { message: String },
}

impl BackendError {
    pub fn unsupported(op: impl Into<String>, reason: impl Into<String>) -> Self {
        BackendError::Unsupported {
            op: op.into(),
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }

    pub fn allocation(message: impl Into<String>) -> Self {
        BackendError::Allocation {
            message: message.into(),
        }
    }
}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// Backend-native runnable produced by compiling one node.
pub trait ExecutableFunction: Send {
    /// Runs the compiled kernel once.
    fn run(&mut self) -> BackendResult<()>;

    /// One-time preparation (e.g. weight layout transforms) ahead of the first run.
    fn prepare(&mut self) -> BackendResult<()> {
        Ok(())
    }
}

/// Implementation of validation, tensor storage and node compilation for one target.
///
/// Backends are looked up by [`Target`] in a
/// [`BackendRegistry`](crate::backend::registry::BackendRegistry) and only ever referenced by
/// the engine, never owned.
pub trait DeviceBackend: Send + Sync {
    /// Returns a human-readable backend identifier (e.g. `"cpu-ref"`).
    fn backend_name(&self) -> &str;

    /// Target this backend serves.
    fn target(&self) -> Target;

    /// One-time process-level initialization, run when a graph manager is created.
    fn initialize_backend(&self) {}

    /// Whether the hardware behind this backend is usable on this machine.
    fn is_backend_supported(&self) -> bool {
        true
    }

    /// Installs this backend's defaults into a graph context that has not been finalized.
    ///
    /// The default registers a memory-manager context for [`DeviceBackend::target`] carrying the
    /// backend's transition memory group when the context enables transition memory sharing.
    fn setup_backend_context(&self, ctx: &mut GraphContext) -> GraphResult<()> {
        if ctx.memory_management_ctx(self.target()).is_some() {
            return Ok(());
        }
        let cross_group = if ctx.config().use_transition_memory_manager {
            self.create_transition_memory_group()
        } else {
            None
        };
        ctx.insert_memory_management_ctx(MemoryManagerContext {
            target: self.target(),
            cross_group,
        })?;
        Ok(())
    }

    /// Creates the pooled group that shares storage between non-overlapping tensor lifetimes.
    fn create_transition_memory_group(&self) -> Option<Arc<dyn MemoryGroup>> {
        None
    }

    /// Checks that the node can be compiled by this backend.
    fn validate_node(&self, node: &Node, graph: &Graph) -> BackendResult<()>;

    /// Creates (but does not allocate) the storage handle for a tensor.
    fn create_tensor(&self, tensor: &Tensor) -> BackendResult<SharedTensorHandle>;

    /// Compiles the node into a runnable function, or `None` for purely structural nodes.
    fn configure_node(
        &self,
        node: &Node,
        graph: &Graph,
        ctx: &GraphContext,
    ) -> BackendResult<Option<Box<dyn ExecutableFunction>>>;

    /// Whether compiled functions must be prepared once during finalization.
    fn requires_prepare(&self) -> bool {
        false
    }

    /// Whether execution is queued on the device, in which case finalization does not run the
    /// graph eagerly and callers must execute explicitly.
    fn queued_execution(&self) -> bool {
        false
    }
}
