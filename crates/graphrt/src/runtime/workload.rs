use std::fmt;

use tracing::trace;

use crate::backend::spec::{BackendResult, ExecutableFunction};
use crate::context::GraphContext;
use crate::error::{GraphError, GraphResult};
use crate::graph::{GraphId, NodeId, TensorId};
use crate::tensor::SharedTensorHandle;

/// One compiled node: the source node paired with its backend function.
pub struct ExecutionTask {
    node: NodeId,
    name: String,
    function: Box<dyn ExecutableFunction>,
}

impl ExecutionTask {
    pub fn new(node: NodeId, name: impl Into<String>, function: Box<dyn ExecutableFunction>) -> Self {
        Self {
            node,
            name: name.into(),
            function,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Name of the source node.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the function's one-time preparation step; a no-op for functions without one.
    pub fn prepare(&mut self) -> BackendResult<()> {
        self.function.prepare()
    }

    /// Runs the task through `executor`.
    pub fn invoke(&mut self, executor: &dyn TaskExecutor) -> GraphResult<()> {
        executor.execute(self)
    }

    fn run_function(&mut self) -> BackendResult<()> {
        self.function.run()
    }
}

impl fmt::Debug for ExecutionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionTask")
            .field("node", &self.node)
            .field("name", &self.name)
            .finish()
    }
}

/// Strategy deciding how a task is dispatched.
///
/// The default runs the function synchronously on the calling thread; asynchronous or batched
/// dispatch can be swapped in without touching any call site.
pub trait TaskExecutor: Send + Sync {
    fn execute(&self, task: &mut ExecutionTask) -> GraphResult<()>;
}

/// Runs each task inline.
#[derive(Debug, Default, Clone, Copy)]
pub struct SynchronousExecutor;

impl TaskExecutor for SynchronousExecutor {
    fn execute(&self, task: &mut ExecutionTask) -> GraphResult<()> {
        execute_task(task)
    }
}

/// Runs a task's function on the calling thread.
pub fn execute_task(task: &mut ExecutionTask) -> GraphResult<()> {
    trace!(node = %task.node, name = %task.name, "run task");
    task.run_function().map_err(|source| GraphError::Task {
        node: task.name.clone(),
        source,
    })
}

/// Compiled, reusable artifact produced by finalizing a graph.
///
/// Tasks are kept in node-container order. Inputs and outputs are recorded as the boundary node
/// together with the tensor it moves, both ids into the source graph. The context is the sealed
/// context the graph was finalized against.
pub struct ExecutionWorkload {
    graph: GraphId,
    context: GraphContext,
    tasks: Vec<ExecutionTask>,
    input_nodes: Vec<NodeId>,
    output_nodes: Vec<NodeId>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    managed: Vec<SharedTensorHandle>,
}

impl ExecutionWorkload {
    pub fn new(graph: GraphId) -> Self {
        Self {
            graph,
            context: GraphContext::default(),
            tasks: Vec::new(),
            input_nodes: Vec::new(),
            output_nodes: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            managed: Vec::new(),
        }
    }

    pub fn graph_id(&self) -> GraphId {
        self.graph
    }

    pub fn context(&self) -> &GraphContext {
        &self.context
    }

    /// Attaches the context the workload's transition groups are read from.
    pub fn set_context(&mut self, context: GraphContext) {
        self.context = context;
    }

    pub fn tasks(&self) -> &[ExecutionTask] {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut [ExecutionTask] {
        &mut self.tasks
    }

    pub fn push_task(&mut self, task: ExecutionTask) {
        self.tasks.push(task);
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    /// Input nodes whose accessors are pulled before every execution.
    pub fn input_nodes(&self) -> &[NodeId] {
        &self.input_nodes
    }

    /// Output nodes whose accessors are pushed after every execution.
    pub fn output_nodes(&self) -> &[NodeId] {
        &self.output_nodes
    }

    pub fn push_input(&mut self, node: NodeId, tensor: TensorId) {
        self.input_nodes.push(node);
        self.inputs.push(tensor);
    }

    pub fn push_output(&mut self, node: NodeId, tensor: TensorId) {
        self.output_nodes.push(node);
        self.outputs.push(tensor);
    }

    /// Handles currently planned into a transition group on behalf of this workload.
    pub fn managed_handles(&self) -> &[SharedTensorHandle] {
        &self.managed
    }

    pub(crate) fn push_managed(&mut self, handle: SharedTensorHandle) {
        self.managed.push(handle);
    }

    pub(crate) fn take_managed(&mut self) -> Vec<SharedTensorHandle> {
        std::mem::take(&mut self.managed)
    }
}

impl fmt::Debug for ExecutionWorkload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionWorkload")
            .field("graph", &self.graph)
            .field("tasks", &self.tasks)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("managed", &self.managed.len())
            .finish()
    }
}
