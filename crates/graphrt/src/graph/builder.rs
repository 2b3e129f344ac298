//! Minimal front end for assembling graphs node by node.

use crate::error::{GraphError, GraphResult};
use crate::target::Target;
use crate::tensor::{TensorAccessor, TensorDescriptor};

use super::{Graph, GraphId, NodeId, NodeType, Operation};

/// Reference to output slot `idx` of `node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeOutput {
    pub node: NodeId,
    pub idx: usize,
}

impl From<NodeId> for NodeOutput {
    fn from(node: NodeId) -> Self {
        NodeOutput { node, idx: 0 }
    }
}

/// Builds a [`Graph`] in execution order.
///
/// Nodes are appended in the order the builder methods are called, and that order is trusted
/// as the execution order once the graph is finalized.
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: Graph::new(name),
        }
    }

    pub fn with_id(id: GraphId, name: impl Into<String>) -> Self {
        Self {
            graph: Graph::with_id(id, name),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Adds a graph input whose tensor is fed by `accessor` before every execution.
    pub fn input(
        &mut self,
        name: impl Into<String>,
        desc: TensorDescriptor,
        accessor: impl TensorAccessor + 'static,
    ) -> NodeOutput {
        self.source(name, NodeType::Input, desc, Box::new(accessor))
    }

    /// Adds a constant whose tensor is populated once by `accessor` during finalization.
    pub fn constant(
        &mut self,
        name: impl Into<String>,
        desc: TensorDescriptor,
        accessor: impl TensorAccessor + 'static,
    ) -> NodeOutput {
        self.source(name, NodeType::Const, desc, Box::new(accessor))
    }

    /// Adds a compute node whose output descriptor is inferred from its first operand.
    pub fn compute(
        &mut self,
        name: impl Into<String>,
        op: Operation,
        inputs: &[NodeOutput],
    ) -> GraphResult<NodeOutput> {
        let desc = self.infer_output_desc(&op, inputs)?;
        self.compute_with_desc(name, op, inputs, desc)
    }

    pub fn compute_with_desc(
        &mut self,
        name: impl Into<String>,
        op: Operation,
        inputs: &[NodeOutput],
        desc: TensorDescriptor,
    ) -> GraphResult<NodeOutput> {
        let node = self
            .graph
            .add_node(name, NodeType::Compute(op), inputs.len(), vec![desc]);
        for (slot, input) in inputs.iter().enumerate() {
            self.graph.add_connection(input.node, input.idx, node, slot)?;
        }
        Ok(NodeOutput { node, idx: 0 })
    }

    /// Adds a graph output draining `from` through `accessor` after every execution.
    pub fn output(
        &mut self,
        name: impl Into<String>,
        from: NodeOutput,
        accessor: impl TensorAccessor + 'static,
    ) -> GraphResult<NodeId> {
        let node = self.graph.add_node(name, NodeType::Output, 1, Vec::new());
        self.graph.add_connection(from.node, from.idx, node, 0)?;
        self.graph.set_accessor(node, Box::new(accessor))?;
        Ok(node)
    }

    /// Pins a node to an explicit target instead of the finalize-time effective target.
    pub fn assign_target(&mut self, node: NodeId, target: Target) -> GraphResult<()> {
        let graph_id = self.graph.id();
        self.graph
            .node_mut(node)
            .ok_or(GraphError::MissingNode {
                graph: graph_id,
                node,
            })?
            .set_assigned_target(target);
        Ok(())
    }

    pub fn build(self) -> Graph {
        self.graph
    }

    fn source(
        &mut self,
        name: impl Into<String>,
        node_type: NodeType,
        desc: TensorDescriptor,
        accessor: Box<dyn TensorAccessor>,
    ) -> NodeOutput {
        let node = self.graph.add_node(name, node_type, 0, vec![desc]);
        self.graph.accessors.insert(node, accessor);
        NodeOutput { node, idx: 0 }
    }

    fn output_tensor(&self, output: NodeOutput) -> GraphResult<super::TensorId> {
        self.graph
            .require_node(output.node)?
            .output(output.idx)
            .ok_or_else(|| {
                GraphError::invalid_graph(format!(
                    "node {} has no output slot {}",
                    output.node, output.idx
                ))
            })
    }

    fn infer_output_desc(
        &self,
        op: &Operation,
        inputs: &[NodeOutput],
    ) -> GraphResult<TensorDescriptor> {
        let first = inputs.first().ok_or_else(|| {
            GraphError::invalid_graph(format!("{} requires at least one operand", op.name()))
        })?;
        let lhs = self.graph.require_tensor(self.output_tensor(*first)?)?.desc().clone();
        if *op != Operation::MatMul {
            return Ok(lhs);
        }

        let rhs_output = inputs.get(1).ok_or_else(|| {
            GraphError::invalid_graph("matmul requires two operands".to_string())
        })?;
        let rhs = self.graph.require_tensor(self.output_tensor(*rhs_output)?)?.desc();
        match (lhs.shape.dims(), rhs.shape.dims()) {
            ([m, _], [_, n]) => Ok(TensorDescriptor {
                shape: [*m, *n].into(),
                ..lhs.clone()
            }),
            _ => Err(GraphError::invalid_graph(format!(
                "matmul expects rank-2 operands, got {:?} and {:?}",
                lhs.shape.dims(),
                rhs.shape.dims()
            ))),
        }
    }
}
