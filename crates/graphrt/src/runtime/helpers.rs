//! Individual finalization and execution steps.
//!
//! Each function implements one step of the pipeline driven by
//! [`GraphManager`](super::GraphManager). They are public so callers with unusual lifecycles
//! (or passes that add tensors) can reuse them.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use crate::backend::registry::BackendRegistry;
use crate::backend::spec::DeviceBackend;
use crate::context::GraphContext;
use crate::error::{GraphError, GraphResult};
use crate::graph::{Graph, Node, NodeId, NodeType, Tensor, TensorId};
use crate::memory::MemoryGroup;
use crate::target::Target;

use super::timing;
use super::workload::{ExecutionTask, ExecutionWorkload, TaskExecutor};

/// Platform default targets, in order of preference.
const DEFAULT_TARGETS: [Target; 2] = [Target::Cpu, Target::Gpu];

fn backend_for(registry: &BackendRegistry, target: Target) -> GraphResult<Arc<dyn DeviceBackend>> {
    registry
        .find_backend(target)
        .ok_or(GraphError::MissingBackend { target })
}

/// Runs every registered backend's one-time initialization.
pub fn default_initialize_backends(registry: &BackendRegistry) {
    for backend in registry.backends() {
        debug!(backend = backend.backend_name(), target = %backend.target(), "initialize backend");
        backend.initialize_backend();
    }
}

/// Lets every supported backend install its defaults into a context that is not sealed yet.
pub fn setup_default_graph_context(
    ctx: &mut GraphContext,
    registry: &BackendRegistry,
) -> GraphResult<()> {
    if ctx.is_finalized() {
        return Ok(());
    }
    for backend in registry.backends() {
        if backend.is_backend_supported() {
            backend.setup_backend_context(ctx)?;
        }
    }
    Ok(())
}

pub fn is_target_supported(registry: &BackendRegistry, target: Target) -> bool {
    registry
        .find_backend(target)
        .map(|backend| backend.is_backend_supported())
        .unwrap_or(false)
}

/// First supported platform default target.
pub fn default_target(registry: &BackendRegistry) -> GraphResult<Target> {
    DEFAULT_TARGETS
        .into_iter()
        .find(|target| is_target_supported(registry, *target))
        .ok_or(GraphError::NoSupportedTarget)
}

/// The requested target if a supported backend exists for it, else the platform default.
pub fn resolve_target(registry: &BackendRegistry, requested: Target) -> GraphResult<Target> {
    if requested.is_specified() && is_target_supported(registry, requested) {
        return Ok(requested);
    }
    default_target(registry)
}

/// Assigns `target` to every node and tensor without an explicit target.
///
/// Output tensors of a node pinned to another target follow that node.
pub fn force_target_to_graph(graph: &mut Graph, target: Target) {
    let mut inherited: Vec<(TensorId, Target)> = Vec::new();
    for node in graph.nodes_mut() {
        if !node.assigned_target().is_specified() {
            node.set_assigned_target(target);
        }
        let node_target = node.assigned_target();
        inherited.extend(node.outputs().map(|tensor| (tensor, node_target)));
    }
    for (tensor, node_target) in inherited {
        if let Some(tensor) = graph.tensor_mut(tensor) {
            if !tensor.desc().target.is_specified() {
                tensor.desc_mut().target = node_target;
            }
        }
    }
    for tensor in graph.tensors_mut() {
        if !tensor.desc().target.is_specified() {
            tensor.desc_mut().target = target;
        }
    }
}

/// Asks the tensor's backend for a storage handle.
pub fn configure_tensor(tensor: &mut Tensor, registry: &BackendRegistry) -> GraphResult<()> {
    let backend = backend_for(registry, tensor.desc().target)?;
    let handle = backend.create_tensor(tensor)?;
    tensor.set_handle(handle);
    Ok(())
}

pub fn configure_all_tensors(graph: &mut Graph, registry: &BackendRegistry) -> GraphResult<()> {
    debug!(graph = %graph.id(), "configure all tensors");
    for tensor in graph.tensors_mut() {
        configure_tensor(tensor, registry)?;
    }
    Ok(())
}

/// Validates every node against its assigned backend.
pub fn validate_all_nodes(graph: &Graph, registry: &BackendRegistry) -> GraphResult<()> {
    debug!(graph = %graph.id(), "validate all nodes");
    for node in graph.nodes() {
        let backend = backend_for(registry, node.assigned_target())?;
        backend
            .validate_node(node, graph)
            .map_err(|err| GraphError::Validation {
                node: node.name().to_string(),
                message: err.to_string(),
            })?;
    }
    Ok(())
}

/// Compiles every node into the workload's task list and collects graph inputs and outputs.
pub fn configure_all_nodes(
    graph: &Graph,
    ctx: &GraphContext,
    registry: &BackendRegistry,
) -> GraphResult<ExecutionWorkload> {
    debug!(graph = %graph.id(), "configure all nodes");
    let mut workload = ExecutionWorkload::new(graph.id());

    for node in graph.nodes() {
        let backend = backend_for(registry, node.assigned_target())?;
        if let Some(function) = backend.configure_node(node, graph, ctx)? {
            workload.push_task(ExecutionTask::new(node.id(), node.name(), function));
        }
    }

    for node in graph.nodes() {
        match node.node_type() {
            NodeType::Input => {
                workload.push_input(node.id(), sole_tensor(node, node.output(0), "output")?)
            }
            NodeType::Output => {
                workload.push_output(node.id(), sole_tensor(node, node.input(0), "input")?)
            }
            _ => {}
        }
    }
    Ok(workload)
}

fn sole_tensor(node: &Node, tensor: Option<TensorId>, slot: &str) -> GraphResult<TensorId> {
    tensor.ok_or_else(|| {
        GraphError::invalid_graph(format!(
            "{} node '{}' has no {slot} tensor",
            node.node_type(),
            node.name()
        ))
    })
}

fn allocate_bound(graph: &Graph, tensors: impl Iterator<Item = TensorId>) -> GraphResult<()> {
    for tensor in tensors {
        let tensor = graph.require_tensor(tensor)?;
        if tensor.bound_edges().is_empty() {
            continue;
        }
        tensor.require_handle()?.allocate()?;
    }
    Ok(())
}

pub fn allocate_all_input_tensors(node: &Node, graph: &Graph) -> GraphResult<()> {
    allocate_bound(graph, node.inputs())
}

pub fn allocate_all_output_tensors(node: &Node, graph: &Graph) -> GraphResult<()> {
    allocate_bound(graph, node.outputs())
}

/// Allocates the outputs of constant and input nodes, consumed or not, so their accessors always
/// have storage to write into.
pub fn allocate_const_tensors(graph: &Graph) -> GraphResult<()> {
    for node in graph.nodes() {
        if !matches!(node.node_type(), NodeType::Const | NodeType::Input) {
            continue;
        }
        for tensor in node.outputs() {
            graph.require_tensor(tensor)?.require_handle()?.allocate()?;
        }
    }
    Ok(())
}

/// Allocates every bound, resizable and still used tensor individually.
pub fn allocate_all_tensors(graph: &Graph) -> GraphResult<()> {
    debug!(graph = %graph.id(), "allocate all tensors");
    for tensor in graph.tensors() {
        if tensor.bound_edges().is_empty() {
            continue;
        }
        if let Some(handle) = tensor.handle() {
            if handle.is_resizable() && handle.is_used() {
                handle.allocate()?;
            }
        }
    }
    Ok(())
}

/// Frees the storage of tensors nothing needs anymore.
///
/// Graph inputs keep their storage even when unconsumed; their accessors run on every execution.
pub fn release_unused_tensors(graph: &Graph) {
    let inputs: HashSet<TensorId> = graph
        .nodes()
        .filter(|node| *node.node_type() == NodeType::Input)
        .flat_map(|node| node.outputs())
        .collect();
    for tensor in graph.tensors() {
        let Some(handle) = tensor.handle() else {
            continue;
        };
        if tensor.bound_edges().is_empty() {
            if inputs.contains(&tensor.id()) {
                continue;
            }
            if handle.is_allocated() {
                trace!(tensor = %tensor.id(), "release unbound tensor");
                handle.free();
            }
        } else {
            handle.release_if_unused();
        }
    }
}

/// Runs the accessor installed on `node` against its boundary tensor.
pub fn call_tensor_accessor(graph: &mut Graph, node: NodeId) -> GraphResult<bool> {
    graph.call_accessor(node)
}

/// Populates every constant through its accessor, consumed or not.
pub fn call_all_const_node_accessors(graph: &mut Graph) -> GraphResult<()> {
    let constants: Vec<NodeId> = graph
        .nodes()
        .filter(|node| *node.node_type() == NodeType::Const)
        .map(Node::id)
        .collect();
    for node in constants {
        trace!(node = %node, "populate constant");
        call_tensor_accessor(graph, node)?;
    }
    Ok(())
}

pub fn call_all_input_node_accessors(
    workload: &ExecutionWorkload,
    graph: &mut Graph,
) -> GraphResult<()> {
    for node in workload.input_nodes() {
        call_tensor_accessor(graph, *node)?;
    }
    Ok(())
}

/// Prepares every task, reclaiming tensors that became unused after each preparation.
pub fn prepare_all_tasks(workload: &mut ExecutionWorkload, graph: &Graph) -> GraphResult<()> {
    debug!(graph = %graph.id(), tasks = workload.tasks().len(), "prepare all tasks");
    for task in workload.tasks_mut() {
        task.prepare().map_err(|source| GraphError::Task {
            node: task.name().to_string(),
            source,
        })?;
        release_unused_tensors(graph);
    }
    Ok(())
}

/// Runs every task in order between one acquire and one release of the transition groups.
///
/// Groups acquired before a failure are always released. A task or acquire error takes
/// precedence over a release error.
pub fn call_all_tasks(
    workload: &mut ExecutionWorkload,
    executor: &dyn TaskExecutor,
) -> GraphResult<()> {
    let groups: Vec<Arc<dyn MemoryGroup>> =
        workload.context().transition_groups().cloned().collect();

    let mut acquired = 0;
    let mut outcome: GraphResult<()> = Ok(());
    for group in &groups {
        if let Err(err) = group.acquire() {
            outcome = Err(err.into());
            break;
        }
        acquired += 1;
    }

    if outcome.is_ok() {
        let start = Instant::now();
        for task in workload.tasks_mut() {
            outcome = task.invoke(executor);
            if outcome.is_err() {
                break;
            }
        }
        timing::add_execution_time(start.elapsed());
    }

    let mut release_error = None;
    for group in &groups[..acquired] {
        if let Err(err) = group.release() {
            release_error.get_or_insert(err);
        }
    }
    match release_error {
        Some(err) if outcome.is_ok() => Err(err.into()),
        _ => outcome,
    }
}

pub fn call_all_output_node_accessors(
    workload: &ExecutionWorkload,
    graph: &mut Graph,
) -> GraphResult<()> {
    for node in workload.output_nodes() {
        call_tensor_accessor(graph, *node)?;
    }
    Ok(())
}

/// Runs one execution of a finalized workload: pull inputs, run every task, push outputs.
///
/// Fails with [`GraphError::GraphMismatch`] when `workload` was not built from `graph`. The graph
/// manager looks workloads up by graph id, so this only guards direct callers.
pub fn execute_workload(
    workload: &mut ExecutionWorkload,
    graph: &mut Graph,
    executor: &dyn TaskExecutor,
) -> GraphResult<()> {
    if workload.graph_id() != graph.id() {
        return Err(GraphError::GraphMismatch {
            expected: workload.graph_id(),
            actual: graph.id(),
        });
    }
    call_all_input_node_accessors(workload, graph)?;
    call_all_tasks(workload, executor)?;
    call_all_output_node_accessors(workload, graph)
}
