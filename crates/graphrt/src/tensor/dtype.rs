//! Enumerates the scalar element types a tensor descriptor can carry.

use serde::{Deserialize, Serialize};

/// Logical dtype identifier shared between descriptors and backend handles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 32-bit floating point following IEEE-754 semantics.
    #[default]
    F32,
    /// 16-bit floating point (fp16).
    F16,
    /// 16-bit bfloat16.
    BF16,
    /// 32-bit signed integer.
    I32,
    /// 8-bit unsigned integer, used for quantized payloads.
    U8,
}

impl DType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F16 | DType::BF16 => 2,
            DType::U8 => 1,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F16 | DType::BF16)
    }
}
