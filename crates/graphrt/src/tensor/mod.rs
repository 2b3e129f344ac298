//! Tensor metadata, backend storage handles and host accessors.

mod accessor;
mod desc;
mod dtype;
mod handle;
mod shape;

pub use accessor::{HostSink, HostSource, TensorAccessor};
pub use desc::TensorDescriptor;
pub use dtype::DType;
pub use handle::{SharedTensorHandle, TensorHandle};
pub use shape::Shape;
