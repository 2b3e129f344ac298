use serde::{Deserialize, Serialize};

use crate::target::Target;

use super::{DType, Shape};

/// Static metadata describing a graph tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorDescriptor {
    pub shape: Shape,
    pub dtype: DType,
    #[serde(default)]
    pub target: Target,
}

impl TensorDescriptor {
    pub fn new(shape: impl Into<Shape>, dtype: DType) -> Self {
        Self {
            shape: shape.into(),
            dtype,
            target: Target::Unspecified,
        }
    }

    pub fn f32(shape: impl Into<Shape>) -> Self {
        Self::new(shape, DType::F32)
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn num_elements(&self) -> usize {
        self.shape.num_elements()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.num_elements() * self.dtype.size_in_bytes()
    }
}
