//! Backend registry mapping hardware targets to backend implementations.
//!
//! A registry can be created explicitly and handed to a
//! [`GraphManager`](crate::runtime::GraphManager), or the process-global instance can be used.
//! Backend crates add themselves to the global registry through the [`BACKEND_REGISTRARS`]
//! distributed slice, which is drained the first time the global registry is touched.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use super::spec::DeviceBackend;
use crate::target::Target;

/// Registration hooks contributed by backend crates.
///
/// ```ignore
/// #[graphrt::linkme::distributed_slice(graphrt::backend::registry::BACKEND_REGISTRARS)]
/// static REGISTER_MY_BACKEND: fn(&BackendRegistry) = register_my_backend;
/// ```
#[linkme::distributed_slice]
pub static BACKEND_REGISTRARS: [fn(&BackendRegistry)] = [..];

static GLOBAL_REGISTRY: Lazy<Arc<BackendRegistry>> = Lazy::new(|| {
    let registry = BackendRegistry::new();
    for register in BACKEND_REGISTRARS {
        register(&registry);
    }
    Arc::new(registry)
});

/// Target-keyed table of backends. At most one backend per target.
#[derive(Default)]
pub struct BackendRegistry {
    backends: RwLock<BTreeMap<Target, Arc<dyn DeviceBackend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-global registry.
    pub fn global() -> Arc<BackendRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// Registers `backend` under its own target, replacing any previous backend for it.
    pub fn register(&self, backend: Arc<dyn DeviceBackend>) {
        let target = backend.target();
        self.backends
            .write()
            .expect("backend registry poisoned")
            .insert(target, backend);
    }

    pub fn register_backend<B: DeviceBackend + 'static>(&self, backend: B) {
        self.register(Arc::new(backend));
    }

    /// Returns the backend for `target`, or `None` when none is registered.
    pub fn find_backend(&self, target: Target) -> Option<Arc<dyn DeviceBackend>> {
        self.backends
            .read()
            .expect("backend registry poisoned")
            .get(&target)
            .cloned()
    }

    pub fn contains(&self, target: Target) -> bool {
        self.backends
            .read()
            .expect("backend registry poisoned")
            .contains_key(&target)
    }

    /// All registered backends, ordered by target.
    pub fn backends(&self) -> Vec<Arc<dyn DeviceBackend>> {
        self.backends
            .read()
            .expect("backend registry poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn targets(&self) -> Vec<Target> {
        self.backends
            .read()
            .expect("backend registry poisoned")
            .keys()
            .copied()
            .collect()
    }
}

/// Registers a backend with the global registry.
pub fn register_backend<B: DeviceBackend + 'static>(backend: B) {
    GLOBAL_REGISTRY.register_backend(backend);
}

/// Looks up a backend in the global registry.
pub fn find_backend(target: Target) -> Option<Arc<dyn DeviceBackend>> {
    GLOBAL_REGISTRY.find_backend(target)
}

/// Check if the global registry has a backend for `target`.
pub fn has_backend(target: Target) -> bool {
    GLOBAL_REGISTRY.contains(target)
}

/// List all targets with a backend in the global registry.
pub fn list_backends() -> Vec<Target> {
    GLOBAL_REGISTRY.targets()
}
