use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::backend::registry::BackendRegistry;
use crate::backend::spec::DeviceBackend;
use crate::context::GraphContext;
use crate::error::{GraphError, GraphResult};
use crate::graph::{Graph, GraphId};
use crate::memory;
use crate::passes::PassManager;
use crate::target::Target;

use super::helpers;
use super::timing;
use super::workload::{ExecutionWorkload, SynchronousExecutor, TaskExecutor};

/// Owns the workloads of finalized graphs, keyed by graph id.
///
/// A graph id moves from unregistered to finalized through [`GraphManager::finalize_graph`] and
/// back out through [`GraphManager::invalidate_graph`]. Calls on the same id must be serialized
/// by the caller.
pub struct GraphManager {
    workloads: HashMap<GraphId, ExecutionWorkload>,
    registry: Arc<BackendRegistry>,
    executor: Arc<dyn TaskExecutor>,
    last_execution: HashMap<GraphId, Duration>,
}

impl Default for GraphManager {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphManager {
    /// Creates a manager on top of the process-global backend registry.
    pub fn new() -> Self {
        Self::with_registry(BackendRegistry::global())
    }

    pub fn with_registry(registry: Arc<BackendRegistry>) -> Self {
        Self::with_executor(registry, Arc::new(SynchronousExecutor))
    }

    /// Creates a manager dispatching tasks through `executor`.
    pub fn with_executor(registry: Arc<BackendRegistry>, executor: Arc<dyn TaskExecutor>) -> Self {
        helpers::default_initialize_backends(&registry);
        Self {
            workloads: HashMap::new(),
            registry,
            executor,
            last_execution: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn is_registered(&self, id: GraphId) -> bool {
        self.workloads.contains_key(&id)
    }

    pub fn workload(&self, id: GraphId) -> Option<&ExecutionWorkload> {
        self.workloads.get(&id)
    }

    /// Wall time of the task loop during the most recent execution of `id`.
    pub fn last_execution_time(&self, id: GraphId) -> Option<Duration> {
        self.last_execution.get(&id).copied()
    }

    /// Compiles `graph` into a workload and registers it under the graph's id.
    ///
    /// `target` is used when a backend exists for it; otherwise the platform default is used.
    /// On targets without queued execution the graph is executed once before returning.
    pub fn finalize_graph(
        &mut self,
        graph: &mut Graph,
        ctx: &mut GraphContext,
        passes: &PassManager,
        target: Target,
    ) -> GraphResult<()> {
        let id = graph.id();
        info!(graph = %id, name = graph.name(), requested = %target, "finalize graph");

        helpers::setup_default_graph_context(ctx, &self.registry)?;

        if self.workloads.contains_key(&id) {
            return Err(GraphError::AlreadyRegistered { id });
        }

        let target = helpers::resolve_target(&self.registry, target)?;
        let backend = self
            .registry
            .find_backend(target)
            .ok_or(GraphError::MissingBackend { target })?;
        debug!(graph = %id, target = %target, backend = backend.backend_name(), "effective target");
        helpers::force_target_to_graph(graph, target);

        helpers::configure_all_tensors(graph, &self.registry)?;

        let stats = passes.run_all(graph)?;
        debug!(graph = %id, passes = passes.num_passes(), changed = stats.changed, "ran passes");

        helpers::validate_all_nodes(graph, &self.registry)?;

        let mut workload = helpers::configure_all_nodes(graph, ctx, &self.registry)?;
        debug!(
            graph = %id,
            tasks = workload.tasks().len(),
            inputs = workload.inputs().len(),
            outputs = workload.outputs().len(),
            "configured workload"
        );

        helpers::allocate_const_tensors(graph)?;
        helpers::call_all_const_node_accessors(graph)?;

        if backend.requires_prepare() {
            helpers::prepare_all_tasks(&mut workload, graph)?;
        }

        if ctx.config().use_transition_memory_manager {
            memory::configure_transition_manager(graph, ctx, &mut workload)?;
        } else {
            helpers::allocate_all_tensors(graph)?;
        }

        ctx.finalize();
        workload.set_context(ctx.clone());
        self.workloads.insert(id, workload);

        self.run_first_execution_if_eager(graph, backend.as_ref())
    }

    /// Executes a freshly registered graph once when its target runs work eagerly.
    ///
    /// Queued-execution targets skip this; their callers invoke [`GraphManager::execute_graph`].
    fn run_first_execution_if_eager(
        &mut self,
        graph: &mut Graph,
        backend: &dyn DeviceBackend,
    ) -> GraphResult<()> {
        if backend.queued_execution() {
            return Ok(());
        }
        debug!(graph = %graph.id(), "eager first execution");
        self.execute_graph(graph)?;
        helpers::release_unused_tensors(graph);
        Ok(())
    }

    /// Runs the registered workload of `graph` once.
    pub fn execute_graph(&mut self, graph: &mut Graph) -> GraphResult<()> {
        let id = graph.id();
        let workload = self
            .workloads
            .get_mut(&id)
            .ok_or(GraphError::NotRegistered { id })?;

        timing::reset_execution_time();
        helpers::execute_workload(workload, graph, self.executor.as_ref())?;
        let elapsed = timing::take_execution_time();

        debug!(graph = %id, elapsed_us = elapsed.as_micros() as u64, "executed graph");
        self.last_execution.insert(id, elapsed);
        Ok(())
    }

    /// Drops the workload registered for `graph` and hands its pooled tensors back to the
    /// transition groups.
    pub fn invalidate_graph(&mut self, graph: &Graph) -> GraphResult<()> {
        let id = graph.id();
        let mut workload = self
            .workloads
            .remove(&id)
            .ok_or(GraphError::NotRegistered { id })?;
        self.last_execution.remove(&id);
        memory::release_transition_memory(&mut workload)?;
        info!(graph = %id, "invalidated graph");
        Ok(())
    }
}
