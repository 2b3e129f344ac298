extern crate self as graphrt;

pub use linkme;

pub mod backend;
pub mod context;
mod env;
pub mod error;
pub mod graph;
pub mod memory;
pub mod passes;
pub mod runtime;
pub mod target;
pub mod tensor;

pub use backend::registry::BackendRegistry;
pub use backend::spec::{BackendError, BackendResult, DeviceBackend, ExecutableFunction};
pub use context::{GraphConfig, GraphContext, MemoryManagerContext};
pub use error::{ErrorKind, GraphError, GraphResult};
pub use graph::{Graph, GraphBuilder, GraphId, Node, NodeId, NodeType, Operation, Tensor, TensorId};
pub use passes::{GraphMutator, PassManager};
pub use runtime::{ExecutionTask, ExecutionWorkload, GraphManager, TaskExecutor};
pub use target::Target;
pub use tensor::{DType, Shape, TensorAccessor, TensorDescriptor, TensorHandle};
