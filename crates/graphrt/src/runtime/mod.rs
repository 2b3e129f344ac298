//! Finalization and execution of graphs.
//!
//! [`GraphManager`] drives the lifecycle (finalize, execute, invalidate) on top of the free
//! functions in [`helpers`], which implement each step against a graph, a context and a
//! [`ExecutionWorkload`].

pub mod helpers;
mod manager;
pub mod timing;
mod workload;

pub use manager::GraphManager;
pub use workload::{
    execute_task, ExecutionTask, ExecutionWorkload, SynchronousExecutor, TaskExecutor,
};
