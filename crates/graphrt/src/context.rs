//! Graph-wide configuration and per-target memory management state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, GraphResult};
use crate::memory::MemoryGroup;
use crate::target::Target;

/// Global configuration applied while finalizing a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Share pooled storage between tensors whose lifetimes do not overlap.
    pub use_transition_memory_manager: bool,
    /// Let backends manage function-internal scratch memory.
    pub use_function_memory_manager: bool,
    /// Worker threads hint forwarded to backends; `None` lets each backend decide.
    pub num_threads: Option<usize>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            use_transition_memory_manager: true,
            use_function_memory_manager: true,
            num_threads: None,
        }
    }
}

impl GraphConfig {
    pub fn from_json(raw: &str) -> GraphResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Applies `GRAPHRT_TRANSITION_MEMORY` and `GRAPHRT_NUM_THREADS` overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(enabled) = crate::env::transition_memory_override() {
            self.use_transition_memory_manager = enabled;
        }
        if let Some(threads) = crate::env::num_threads_override() {
            self.num_threads = Some(threads);
        }
        self
    }

    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }
}

/// Memory management state for one target.
#[derive(Clone)]
pub struct MemoryManagerContext {
    pub target: Target,
    /// Transition group shared by the transient tensors of every task on this target.
    pub cross_group: Option<Arc<dyn MemoryGroup>>,
}

impl fmt::Debug for MemoryManagerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryManagerContext")
            .field("target", &self.target)
            .field("has_cross_group", &self.cross_group.is_some())
            .finish()
    }
}

/// Configuration and memory managers shared by the graphs finalized against it.
///
/// The context is sealed by [`GraphContext::finalize`] once a workload has been built; after
/// that every mutation fails with [`GraphError::ContextSealed`].
#[derive(Debug, Clone, Default)]
pub struct GraphContext {
    config: GraphConfig,
    memory_managers: BTreeMap<Target, MemoryManagerContext>,
    finalized: bool,
}

impl GraphContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: GraphConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: GraphConfig) -> GraphResult<()> {
        self.ensure_mutable()?;
        self.config = config;
        Ok(())
    }

    /// Registers the memory manager context for a target.
    ///
    /// Returns `false` if the target already has one.
    pub fn insert_memory_management_ctx(&mut self, ctx: MemoryManagerContext) -> GraphResult<bool> {
        self.ensure_mutable()?;
        if self.memory_managers.contains_key(&ctx.target) {
            return Ok(false);
        }
        self.memory_managers.insert(ctx.target, ctx);
        Ok(true)
    }

    pub fn memory_management_ctx(&self, target: Target) -> Option<&MemoryManagerContext> {
        self.memory_managers.get(&target)
    }

    pub fn memory_managers(&self) -> impl Iterator<Item = &MemoryManagerContext> {
        self.memory_managers.values()
    }

    /// Transition groups of every target, in target order.
    pub fn transition_groups(&self) -> impl Iterator<Item = &Arc<dyn MemoryGroup>> {
        self.memory_managers
            .values()
            .filter_map(|ctx| ctx.cross_group.as_ref())
    }

    /// Seals the context. Sealing twice is a no-op.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn ensure_mutable(&self) -> GraphResult<()> {
        if self.finalized {
            return Err(GraphError::ContextSealed);
        }
        Ok(())
    }
}
