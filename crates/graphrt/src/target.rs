//! Hardware target identifiers used to key backends, nodes and tensors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies the hardware backend a node or tensor is assigned to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// No explicit assignment; resolved to the effective target during finalization.
    #[default]
    Unspecified,
    /// Host CPU.
    Cpu,
    /// GPU compute device.
    Gpu,
}

impl Target {
    pub fn is_specified(self) -> bool {
        self != Target::Unspecified
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Target::Unspecified => "unspecified",
            Target::Cpu => "cpu",
            Target::Gpu => "gpu",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
