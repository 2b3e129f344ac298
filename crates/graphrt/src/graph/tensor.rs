use std::collections::BTreeSet;
use std::fmt;

use crate::error::{GraphError, GraphResult};
use crate::tensor::{SharedTensorHandle, TensorDescriptor};

use super::{EdgeId, TensorId};

/// Graph edge value: metadata, optional backend storage and the edges bound to it.
///
/// The bound-edge set holds the producer/consumer connections that still reference the tensor;
/// once it is empty nothing in the graph needs the storage anymore.
pub struct Tensor {
    pub(super) id: TensorId,
    pub(super) desc: TensorDescriptor,
    pub(super) handle: Option<SharedTensorHandle>,
    pub(super) bound_edges: BTreeSet<EdgeId>,
}

impl Tensor {
    pub(super) fn new(id: TensorId, desc: TensorDescriptor) -> Self {
        Self {
            id,
            desc,
            handle: None,
            bound_edges: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn desc(&self) -> &TensorDescriptor {
        &self.desc
    }

    pub fn desc_mut(&mut self) -> &mut TensorDescriptor {
        &mut self.desc
    }

    pub fn handle(&self) -> Option<&SharedTensorHandle> {
        self.handle.as_ref()
    }

    /// Returns the handle or an invariant violation when the tensor was never configured.
    pub fn require_handle(&self) -> GraphResult<&SharedTensorHandle> {
        self.handle
            .as_ref()
            .ok_or(GraphError::MissingHandle { tensor: self.id })
    }

    pub fn set_handle(&mut self, handle: SharedTensorHandle) {
        self.handle = Some(handle);
    }

    pub fn bound_edges(&self) -> &BTreeSet<EdgeId> {
        &self.bound_edges
    }

    pub(super) fn bind_edge(&mut self, edge: EdgeId) {
        self.bound_edges.insert(edge);
    }

    pub(super) fn unbind_edge(&mut self, edge: EdgeId) {
        self.bound_edges.remove(&edge);
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("id", &self.id)
            .field("desc", &self.desc)
            .field("has_handle", &self.handle.is_some())
            .field("bound_edges", &self.bound_edges)
            .finish()
    }
}
