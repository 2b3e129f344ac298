pub mod cpu;
pub mod memory;

pub use cpu::{CpuBackend, CpuTensorHandle};
pub use memory::CpuMemoryGroup;

use graphrt::backend::registry::{BackendRegistry, BACKEND_REGISTRARS};
use graphrt::linkme::distributed_slice;

/// Registers the reference CPU backend with `registry`.
///
/// Runs automatically for the global registry; call it directly for explicitly constructed
/// registries.
pub fn register_cpu_backend(registry: &BackendRegistry) {
    registry.register_backend(CpuBackend::new());
}

#[distributed_slice(BACKEND_REGISTRARS)]
#[linkme(crate = graphrt::linkme)]
static REGISTER_CPU_BACKEND: fn(&BackendRegistry) = register_cpu_backend;
