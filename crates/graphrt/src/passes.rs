//! Graph mutation passes applied once during finalization.
//!
//! Passes run after tensors were configured and before nodes are validated, so a pass that
//! introduces tensors must configure them itself (see
//! [`configure_tensor`](crate::runtime::helpers::configure_tensor)).

use std::sync::Arc;

use tracing::debug;

use crate::error::{GraphError, GraphResult};
use crate::graph::Graph;

/// Whether a pass only rewrites the IR or depends on backend-specific knowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationType {
    Ir,
    Backend,
}

/// Result returned by a [`GraphMutator`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the graph.
    pub changed: bool,
    pub nodes_added: usize,
    pub nodes_removed: usize,
}

impl PassResult {
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            nodes_added: self.nodes_added + other.nodes_added,
            nodes_removed: self.nodes_removed + other.nodes_removed,
        }
    }
}

/// A graph-to-graph mutation.
pub trait GraphMutator: Send + Sync {
    fn name(&self) -> &'static str;

    fn mutation_type(&self) -> MutationType {
        MutationType::Ir
    }

    fn mutate(&self, graph: &mut Graph) -> GraphResult<PassResult>;
}

/// Ordered sequence of passes.
pub struct PassManager {
    passes: Vec<Arc<dyn GraphMutator>>,
    log_stats: bool,
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PassManager {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            log_stats: crate::env::pass_stats_enabled(),
        }
    }

    pub fn append(&mut self, pass: Arc<dyn GraphMutator>) {
        self.passes.push(pass);
    }

    pub fn with_pass(mut self, pass: Arc<dyn GraphMutator>) -> Self {
        self.append(pass);
        self
    }

    pub fn pass(&self, index: usize) -> Option<&Arc<dyn GraphMutator>> {
        self.passes.get(index)
    }

    pub fn passes(&self) -> &[Arc<dyn GraphMutator>] {
        &self.passes
    }

    pub fn num_passes(&self) -> usize {
        self.passes.len()
    }

    pub fn pop_pass(&mut self) -> Option<Arc<dyn GraphMutator>> {
        self.passes.pop()
    }

    pub fn clear(&mut self) {
        self.passes.clear();
    }

    /// Runs every pass once, in order.
    pub fn run_all(&self, graph: &mut Graph) -> GraphResult<PassResult> {
        let mut totals = PassResult::default();
        for pass in &self.passes {
            totals = totals.merge(self.run_pass(pass.as_ref(), graph)?);
        }
        Ok(totals)
    }

    /// Runs the pass at `index`; out-of-range indices are a no-op.
    pub fn run(&self, graph: &mut Graph, index: usize) -> GraphResult<PassResult> {
        match self.passes.get(index) {
            Some(pass) => self.run_pass(pass.as_ref(), graph),
            None => Ok(PassResult::default()),
        }
    }

    /// Runs every pass of the given mutation type, in order.
    pub fn run_type(&self, graph: &mut Graph, kind: MutationType) -> GraphResult<PassResult> {
        let mut totals = PassResult::default();
        for pass in self.passes.iter().filter(|pass| pass.mutation_type() == kind) {
            totals = totals.merge(self.run_pass(pass.as_ref(), graph)?);
        }
        Ok(totals)
    }

    fn run_pass(&self, pass: &dyn GraphMutator, graph: &mut Graph) -> GraphResult<PassResult> {
        let stats = pass.mutate(graph).map_err(|source| GraphError::Pass {
            pass: pass.name(),
            source: Box::new(source),
        })?;
        if self.log_stats {
            debug!(
                pass = pass.name(),
                graph = %graph.id(),
                changed = stats.changed,
                nodes_added = stats.nodes_added,
                nodes_removed = stats.nodes_removed,
                nodes = graph.num_nodes(),
                "pass stats"
            );
        }
        Ok(stats)
    }
}
