use std::any::Any;
use std::sync::Arc;

use crate::backend::spec::{BackendError, BackendResult};
use crate::target::Target;

/// Backend-owned storage behind a graph tensor.
///
/// Handles are created by [`DeviceBackend::create_tensor`](crate::backend::spec::DeviceBackend)
/// and shared between the owning tensor, the compiled functions that read or write it and the
/// transition memory group that may manage its lifetime. Implementations therefore use interior
/// mutability; every method takes `&self`.
pub trait TensorHandle: Send + Sync {
    /// Target whose backend created this handle.
    fn target(&self) -> Target;

    /// Backs the handle with storage. Allocating an allocated handle is a no-op.
    fn allocate(&self) -> BackendResult<()>;

    /// Drops the backing storage, if any.
    fn free(&self);

    fn is_allocated(&self) -> bool;

    /// Whether the storage layout can still change, i.e. nothing has been allocated yet.
    fn is_resizable(&self) -> bool {
        !self.is_allocated()
    }

    /// Whether any compiled function still needs this tensor's contents.
    fn is_used(&self) -> bool;

    /// Flags the contents as no longer needed (e.g. after weights were repacked in `prepare`).
    fn mark_as_unused(&self);

    /// Frees the storage once the handle has been marked unused.
    fn release_if_unused(&self) {
        if !self.is_used() {
            self.free();
        }
    }

    /// Makes the storage host-visible before an accessor runs.
    fn map(&self) -> BackendResult<()> {
        Ok(())
    }

    /// Ends a host-visible window opened by [`TensorHandle::map`].
    fn unmap(&self) {}

    /// Size of the storage in bytes once allocated.
    fn size_in_bytes(&self) -> usize;

    /// Copies host f32 data into the storage.
    fn copy_from_host(&self, _data: &[f32]) -> BackendResult<()> {
        Err(BackendError::unsupported(
            "copy_from_host",
            "handle does not expose host f32 access",
        ))
    }

    /// Reads the storage back as host f32 data.
    fn copy_to_host(&self) -> BackendResult<Vec<f32>> {
        Err(BackendError::unsupported(
            "copy_to_host",
            "handle does not expose host f32 access",
        ))
    }

    /// Downcast hook for backends that need their concrete handle type back.
    fn as_any(&self) -> &dyn Any;
}

/// Handle shared between a tensor, compiled functions and memory groups.
pub type SharedTensorHandle = Arc<dyn TensorHandle>;
