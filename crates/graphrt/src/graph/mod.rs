//! Arena-backed dataflow graph.
//!
//! A [`Graph`] owns every node, tensor and edge in growable arenas. All cross references
//! (node slots, bound edges, workload inputs/outputs) are stable ids into those arenas, so a
//! removed entry leaves a tombstone and existence checks stay O(1).

mod builder;
mod ids;
mod node;
mod tensor;

use std::collections::{BTreeMap, BTreeSet};

use smallvec::SmallVec;

pub use builder::{GraphBuilder, NodeOutput};
pub use ids::{EdgeId, GraphId, NodeId, TensorId};
pub use node::{Node, NodeType, Operation};
pub use tensor::Tensor;

use crate::error::{GraphError, GraphResult};
use crate::target::Target;
use crate::tensor::{TensorAccessor, TensorDescriptor};

/// Connection from a producer output slot to a consumer input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub id: EdgeId,
    pub producer: NodeId,
    pub producer_idx: usize,
    pub consumer: NodeId,
    pub consumer_idx: usize,
    pub tensor: TensorId,
}

pub struct Graph {
    id: GraphId,
    name: String,
    nodes: Vec<Option<Node>>,
    tensors: Vec<Option<Tensor>>,
    edges: Vec<Option<Edge>>,
    /// Boundary callbacks, one per input, constant or output node.
    accessors: BTreeMap<NodeId, Box<dyn TensorAccessor>>,
}

impl Graph {
    /// Creates an empty graph with a fresh process-unique id.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(GraphId::next(), name)
    }

    /// Creates an empty graph with an explicit id.
    pub fn with_id(id: GraphId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            nodes: Vec::new(),
            tensors: Vec::new(),
            edges: Vec::new(),
            accessors: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a node with `num_inputs` empty input slots and one output tensor per descriptor.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        node_type: NodeType,
        num_inputs: usize,
        outputs: Vec<TensorDescriptor>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let outputs = outputs
            .into_iter()
            .map(|desc| Some(self.create_tensor(desc)))
            .collect::<SmallVec<[Option<TensorId>; 2]>>();
        self.nodes.push(Some(Node {
            id,
            name: name.into(),
            node_type,
            assigned_target: Target::Unspecified,
            inputs: SmallVec::from_elem(None, num_inputs),
            outputs,
            input_edges: SmallVec::from_elem(None, num_inputs),
            output_edges: BTreeSet::new(),
        }));
        id
    }

    /// Adds a tensor that no node references yet.
    pub fn create_tensor(&mut self, desc: TensorDescriptor) -> TensorId {
        let id = TensorId(self.tensors.len() as u32);
        self.tensors.push(Some(Tensor::new(id, desc)));
        id
    }

    /// Connects output `producer_idx` of `producer` to input `consumer_idx` of `consumer`.
    ///
    /// An existing connection into the consumer slot is replaced.
    pub fn add_connection(
        &mut self,
        producer: NodeId,
        producer_idx: usize,
        consumer: NodeId,
        consumer_idx: usize,
    ) -> GraphResult<EdgeId> {
        let tensor = self
            .require_node(producer)?
            .output(producer_idx)
            .ok_or_else(|| {
                GraphError::invalid_graph(format!(
                    "node {producer} has no output tensor at slot {producer_idx}"
                ))
            })?;
        let consumer_node = self.require_node(consumer)?;
        if consumer_idx >= consumer_node.num_inputs() {
            return Err(GraphError::invalid_graph(format!(
                "node {consumer} has {} input slots, cannot connect slot {consumer_idx}",
                consumer_node.num_inputs()
            )));
        }
        if let Some(previous) = consumer_node.input_edge(consumer_idx) {
            self.remove_connection(previous);
        }

        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Some(Edge {
            id,
            producer,
            producer_idx,
            consumer,
            consumer_idx,
            tensor,
        }));
        if let Some(node) = self.node_mut(producer) {
            node.output_edges.insert(id);
        }
        if let Some(node) = self.node_mut(consumer) {
            node.input_edges[consumer_idx] = Some(id);
            node.inputs[consumer_idx] = Some(tensor);
        }
        if let Some(tensor) = self.tensor_mut(tensor) {
            tensor.bind_edge(id);
        }
        Ok(id)
    }

    /// Removes an edge; returns `false` when it does not exist.
    pub fn remove_connection(&mut self, edge: EdgeId) -> bool {
        let Some(edge) = self.edges.get_mut(edge.index()).and_then(Option::take) else {
            return false;
        };
        if let Some(node) = self.node_mut(edge.producer) {
            node.output_edges.remove(&edge.id);
        }
        if let Some(node) = self.node_mut(edge.consumer) {
            node.input_edges[edge.consumer_idx] = None;
            node.inputs[edge.consumer_idx] = None;
        }
        if let Some(tensor) = self.tensor_mut(edge.tensor) {
            tensor.unbind_edge(edge.id);
        }
        true
    }

    /// Removes a node together with its connections and output tensors.
    pub fn remove_node(&mut self, node: NodeId) -> bool {
        let Some(existing) = self.node(node) else {
            return false;
        };
        let mut edges: Vec<EdgeId> = existing.input_edges.iter().filter_map(|e| *e).collect();
        edges.extend(existing.output_edges.iter().copied());
        let outputs: Vec<TensorId> = existing.outputs().collect();

        for edge in edges {
            self.remove_connection(edge);
        }
        for tensor in outputs {
            if let Some(slot) = self.tensors.get_mut(tensor.index()) {
                *slot = None;
            }
        }
        self.nodes[node.index()] = None;
        self.accessors.remove(&node);
        true
    }

    /// Installs the accessor of an input, constant or output node, replacing any previous one.
    pub fn set_accessor(
        &mut self,
        node: NodeId,
        accessor: Box<dyn TensorAccessor>,
    ) -> GraphResult<()> {
        let existing = self.require_node(node)?;
        if !existing.node_type().is_structural() {
            return Err(GraphError::invalid_graph(format!(
                "compute node '{}' cannot carry an accessor",
                existing.name()
            )));
        }
        self.accessors.insert(node, accessor);
        Ok(())
    }

    pub fn has_accessor(&self, node: NodeId) -> bool {
        self.accessors.contains_key(&node)
    }

    pub fn extract_accessor(&mut self, node: NodeId) -> Option<Box<dyn TensorAccessor>> {
        self.accessors.remove(&node)
    }

    /// Runs the accessor of `node` against its mapped boundary tensor.
    ///
    /// Returns `Ok(false)` when the node has no accessor installed.
    pub fn call_accessor(&mut self, node: NodeId) -> GraphResult<bool> {
        let graph = self.id;
        let Some(accessor) = self.accessors.get_mut(&node) else {
            return Ok(false);
        };
        let boundary = self.nodes.get(node.index()).and_then(Option::as_ref);
        let tensor = boundary
            .ok_or(GraphError::MissingNode { graph, node })?
            .boundary_tensor()
            .ok_or_else(|| {
                GraphError::invalid_graph(format!("node {node} has no boundary tensor"))
            })?;
        let handle = self
            .tensors
            .get(tensor.index())
            .and_then(Option::as_ref)
            .ok_or(GraphError::MissingTensor { graph, tensor })?
            .require_handle()?;

        handle.map()?;
        let result = accessor.access_tensor(handle.as_ref());
        handle.unmap();

        result.map_err(|source| GraphError::Accessor { tensor, source })?;
        Ok(true)
    }

    /// Rebinds output slot `idx` of `node` to `tensor`, moving every outgoing edge with it.
    pub fn set_node_output(&mut self, node: NodeId, idx: usize, tensor: TensorId) -> GraphResult<()> {
        self.require_tensor(tensor)?;
        let producer = self.require_node(node)?;
        if idx >= producer.num_outputs() {
            return Err(GraphError::invalid_graph(format!(
                "node {node} has no output slot {idx}"
            )));
        }
        let previous = producer.output(idx);
        let moved: Vec<EdgeId> = producer
            .output_edges
            .iter()
            .copied()
            .filter(|edge| {
                self.edge(*edge)
                    .map(|edge| edge.producer_idx == idx)
                    .unwrap_or(false)
            })
            .collect();

        if let Some(node) = self.node_mut(node) {
            node.outputs[idx] = Some(tensor);
        }
        for edge_id in moved {
            let Some(edge) = self.edges[edge_id.index()].as_mut() else {
                continue;
            };
            edge.tensor = tensor;
            let (consumer, consumer_idx) = (edge.consumer, edge.consumer_idx);
            if let Some(consumer) = self.node_mut(consumer) {
                consumer.inputs[consumer_idx] = Some(tensor);
            }
            if let Some(old) = previous.and_then(|prev| self.tensor_mut(prev)) {
                old.unbind_edge(edge_id);
            }
            if let Some(new) = self.tensor_mut(tensor) {
                new.bind_edge(edge_id);
            }
        }
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn require_node(&self, id: NodeId) -> GraphResult<&Node> {
        self.node(id).ok_or(GraphError::MissingNode {
            graph: self.id,
            node: id,
        })
    }

    pub fn tensor(&self, id: TensorId) -> Option<&Tensor> {
        self.tensors.get(id.index()).and_then(Option::as_ref)
    }

    pub fn tensor_mut(&mut self, id: TensorId) -> Option<&mut Tensor> {
        self.tensors.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn require_tensor(&self, id: TensorId) -> GraphResult<&Tensor> {
        self.tensor(id).ok_or(GraphError::MissingTensor {
            graph: self.id,
            tensor: id,
        })
    }

    pub fn require_tensor_mut(&mut self, id: TensorId) -> GraphResult<&mut Tensor> {
        let graph = self.id;
        self.tensor_mut(id)
            .ok_or(GraphError::MissingTensor { graph, tensor: id })
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.index()).and_then(Option::as_ref)
    }

    /// Live nodes in container order, which is also the execution order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter_map(Option::as_ref)
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut().filter_map(Option::as_mut)
    }

    pub fn tensors(&self) -> impl Iterator<Item = &Tensor> {
        self.tensors.iter().filter_map(Option::as_ref)
    }

    pub fn tensors_mut(&mut self) -> impl Iterator<Item = &mut Tensor> {
        self.tensors.iter_mut().filter_map(Option::as_mut)
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter_map(Option::as_ref)
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes().count()
    }

    pub fn num_tensors(&self) -> usize {
        self.tensors().count()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("nodes", &self.num_nodes())
            .field("tensors", &self.num_tensors())
            .field("accessors", &self.accessors.len())
            .finish()
    }
}
