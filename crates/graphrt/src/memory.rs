//! Transition memory: pooled storage shared by tensors with non-overlapping lifetimes.
//!
//! The engine only computes lifetimes and hands them to each target's [`MemoryGroup`]; how a
//! group packs them into pooled allocations is up to the backend.

use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::backend::spec::BackendResult;
use crate::context::GraphContext;
use crate::error::GraphResult;
use crate::graph::{Graph, NodeType, TensorId};
use crate::runtime::ExecutionWorkload;
use crate::tensor::SharedTensorHandle;

/// Closed interval of task indices during which a tensor's contents are live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorLifetime {
    pub tensor: TensorId,
    pub start: usize,
    pub end: usize,
}

impl TensorLifetime {
    pub fn overlaps(&self, other: &TensorLifetime) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Pooled allocation group acquired around a whole execution.
pub trait MemoryGroup: Send + Sync {
    /// Offline planning entry: puts `handle` under the group's management for `lifetime`.
    fn manage(&self, handle: SharedTensorHandle, lifetime: TensorLifetime) -> BackendResult<()>;

    /// Takes `handle` back out of the group, e.g. when its graph is invalidated. The plan must
    /// be finalized again before the next acquire.
    fn unmanage(&self, handle: &SharedTensorHandle) -> BackendResult<()>;

    /// Called after every managed handle was registered or unregistered.
    fn finalize_plan(&self) -> BackendResult<()>;

    /// Backs every managed handle with pooled storage.
    fn acquire(&self) -> BackendResult<()>;

    /// Returns the pooled storage.
    fn release(&self) -> BackendResult<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Tensors that must stay individually allocated across executions: the outputs of input and
/// constant nodes and the inputs of output nodes.
fn boundary_tensors(graph: &Graph) -> HashSet<TensorId> {
    let mut boundary = HashSet::new();
    for node in graph.nodes() {
        match node.node_type() {
            NodeType::Input | NodeType::Const => boundary.extend(node.outputs()),
            NodeType::Output => boundary.extend(node.inputs()),
            NodeType::Compute(_) => {}
        }
    }
    boundary
}

/// Computes the lifetime of every transient tensor touched by the workload's tasks.
///
/// A tensor is transient when it is not a boundary tensor, still has bound edges, has a
/// resizable handle and is still in use.
pub fn transient_lifetimes(graph: &Graph, workload: &ExecutionWorkload) -> Vec<TensorLifetime> {
    let boundary = boundary_tensors(graph);
    let mut lifetimes: BTreeMap<TensorId, TensorLifetime> = BTreeMap::new();

    for (idx, task) in workload.tasks().iter().enumerate() {
        let Some(node) = graph.node(task.node()) else {
            continue;
        };
        for tensor_id in node.inputs().chain(node.outputs()) {
            if boundary.contains(&tensor_id) {
                continue;
            }
            let Some(tensor) = graph.tensor(tensor_id) else {
                continue;
            };
            let eligible = !tensor.bound_edges().is_empty()
                && tensor
                    .handle()
                    .map(|handle| handle.is_resizable() && handle.is_used())
                    .unwrap_or(false);
            if !eligible {
                continue;
            }
            lifetimes
                .entry(tensor_id)
                .and_modify(|lifetime| {
                    lifetime.start = lifetime.start.min(idx);
                    lifetime.end = lifetime.end.max(idx);
                })
                .or_insert(TensorLifetime {
                    tensor: tensor_id,
                    start: idx,
                    end: idx,
                });
        }
    }
    lifetimes.into_values().collect()
}

/// Hands transient tensors to their target's transition group and allocates everything else.
///
/// Transient tensors on a target without a transition group, and boundary tensors that are
/// still unallocated, are allocated individually. The handles put under group management are
/// recorded on the workload so [`release_transition_memory`] can take them back.
pub fn configure_transition_manager(
    graph: &Graph,
    ctx: &GraphContext,
    workload: &mut ExecutionWorkload,
) -> GraphResult<()> {
    let lifetimes = transient_lifetimes(graph, workload);
    let mut managed = HashSet::new();

    for lifetime in &lifetimes {
        let handle = graph.require_tensor(lifetime.tensor)?.require_handle()?;
        let group = ctx
            .memory_management_ctx(handle.target())
            .and_then(|mm| mm.cross_group.as_ref());
        match group {
            Some(group) => {
                group.manage(handle.clone(), *lifetime)?;
                managed.insert(lifetime.tensor);
                workload.push_managed(handle.clone());
            }
            None => handle.allocate()?,
        }
    }

    for group in ctx.transition_groups() {
        group.finalize_plan()?;
    }

    for tensor in graph.tensors() {
        if managed.contains(&tensor.id()) || tensor.bound_edges().is_empty() {
            continue;
        }
        if let Some(handle) = tensor.handle() {
            if handle.is_resizable() && handle.is_used() {
                handle.allocate()?;
            }
        }
    }

    debug!(
        graph = %graph.id(),
        managed = managed.len(),
        "configured transition memory"
    );
    Ok(())
}

/// Removes the workload's tensors from the transition groups they were planned into and
/// replans those groups, so graphs still sharing the context keep acquiring.
pub fn release_transition_memory(workload: &mut ExecutionWorkload) -> GraphResult<()> {
    let handles = workload.take_managed();
    let mut touched: Vec<Arc<dyn MemoryGroup>> = Vec::new();
    for handle in &handles {
        let Some(group) = workload
            .context()
            .memory_management_ctx(handle.target())
            .and_then(|mm| mm.cross_group.as_ref())
        else {
            continue;
        };
        group.unmanage(handle)?;
        handle.free();
        if !touched.iter().any(|seen| Arc::ptr_eq(seen, group)) {
            touched.push(Arc::clone(group));
        }
    }
    for group in &touched {
        group.finalize_plan()?;
    }

    debug!(
        graph = %workload.graph_id(),
        released = handles.len(),
        "released transition memory"
    );
    Ok(())
}
