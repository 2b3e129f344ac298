use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::target::Target;

use super::{EdgeId, NodeId, TensorId};

/// Compute operation carried by a [`NodeType::Compute`] node.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Identity,
    Add,
    Mul,
    Relu,
    Scale { factor: f32 },
    /// `[m, k] x [k, n] -> [m, n]`; the second operand is usually a constant weight.
    MatMul,
    /// Operation only known to a specific backend.
    Custom(Arc<str>),
}

impl Operation {
    pub fn name(&self) -> &str {
        match self {
            Operation::Identity => "identity",
            Operation::Add => "add",
            Operation::Mul => "mul",
            Operation::Relu => "relu",
            Operation::Scale { .. } => "scale",
            Operation::MatMul => "matmul",
            Operation::Custom(name) => name,
        }
    }

    /// Number of input slots the operation expects.
    pub fn arity(&self) -> usize {
        match self {
            Operation::Add | Operation::Mul | Operation::MatMul => 2,
            _ => 1,
        }
    }
}

/// Type tag of a graph node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeType {
    /// Graph input; its sole output is fed by an accessor before each run.
    Input,
    /// Graph output; its sole input is drained by an accessor after each run.
    Output,
    /// Constant; its sole output is populated once during finalization.
    Const,
    Compute(Operation),
}

impl NodeType {
    pub fn is_structural(&self) -> bool {
        !matches!(self, NodeType::Compute(_))
    }

    pub fn operation(&self) -> Option<&Operation> {
        match self {
            NodeType::Compute(op) => Some(op),
            _ => None,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Input => f.write_str("input"),
            NodeType::Output => f.write_str("output"),
            NodeType::Const => f.write_str("const"),
            NodeType::Compute(op) => f.write_str(op.name()),
        }
    }
}

/// Graph vertex: one compute operation or a structural marker.
///
/// Input/output slots hold non-owning tensor ids into the owning graph's arena.
#[derive(Debug, Clone)]
pub struct Node {
    pub(super) id: NodeId,
    pub(super) name: String,
    pub(super) node_type: NodeType,
    pub(super) assigned_target: Target,
    pub(super) inputs: SmallVec<[Option<TensorId>; 4]>,
    pub(super) outputs: SmallVec<[Option<TensorId>; 2]>,
    pub(super) input_edges: SmallVec<[Option<EdgeId>; 4]>,
    pub(super) output_edges: BTreeSet<EdgeId>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_type(&self) -> &NodeType {
        &self.node_type
    }

    pub fn assigned_target(&self) -> Target {
        self.assigned_target
    }

    pub fn set_assigned_target(&mut self, target: Target) {
        self.assigned_target = target;
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn input(&self, idx: usize) -> Option<TensorId> {
        self.inputs.get(idx).copied().flatten()
    }

    pub fn output(&self, idx: usize) -> Option<TensorId> {
        self.outputs.get(idx).copied().flatten()
    }

    pub fn inputs(&self) -> impl Iterator<Item = TensorId> + '_ {
        self.inputs.iter().filter_map(|slot| *slot)
    }

    pub fn outputs(&self) -> impl Iterator<Item = TensorId> + '_ {
        self.outputs.iter().filter_map(|slot| *slot)
    }

    /// Tensor moved across the graph boundary by this node's accessor: the sole output of an
    /// input or constant, the sole input of an output. Compute nodes have none.
    pub fn boundary_tensor(&self) -> Option<TensorId> {
        match self.node_type {
            NodeType::Input | NodeType::Const => self.output(0),
            NodeType::Output => self.input(0),
            NodeType::Compute(_) => None,
        }
    }

    pub fn input_edge(&self, idx: usize) -> Option<EdgeId> {
        self.input_edges.get(idx).copied().flatten()
    }

    pub fn output_edges(&self) -> &BTreeSet<EdgeId> {
        &self.output_edges
    }
}
