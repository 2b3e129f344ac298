use std::sync::Arc;

use graphrt::backend::registry::{find_backend, has_backend, list_backends};
use graphrt::runtime::helpers;
use graphrt::{BackendRegistry, ErrorKind, GraphError, Target};
use graphrt_backend_tests::{EventLog, RecordingBackend};

#[test]
fn explicit_registry_maps_targets_to_backends() {
    let log = EventLog::new();
    let registry = BackendRegistry::new();
    assert!(registry.backends().is_empty());
    assert!(registry.find_backend(Target::Cpu).is_none());

    registry.register_backend(RecordingBackend::new(&log).with_name("first"));
    registry.register_backend(
        RecordingBackend::new(&log)
            .with_name("gpu")
            .with_target(Target::Gpu),
    );

    assert!(registry.contains(Target::Cpu));
    assert_eq!(registry.targets(), [Target::Cpu, Target::Gpu]);
    assert_eq!(
        registry.find_backend(Target::Cpu).unwrap().backend_name(),
        "first"
    );

    registry.register(Arc::new(RecordingBackend::new(&log).with_name("second")));
    assert_eq!(registry.backends().len(), 2);
    assert_eq!(
        registry.find_backend(Target::Cpu).unwrap().backend_name(),
        "second"
    );
}

#[test]
fn global_registry_contains_linked_cpu_backend() {
    // Referencing the crate keeps its registrar linked into this test binary.
    let _ = graphrt_backend_ref_cpu::register_cpu_backend;

    assert!(has_backend(Target::Cpu));
    assert!(list_backends().contains(&Target::Cpu));
    assert_eq!(find_backend(Target::Cpu).unwrap().backend_name(), "cpu-ref");
    assert!(Arc::ptr_eq(&BackendRegistry::global(), &BackendRegistry::global()));
}

#[test]
fn default_target_prefers_cpu_over_gpu() {
    let log = EventLog::new();
    let registry = BackendRegistry::new();
    registry.register_backend(RecordingBackend::new(&log).with_target(Target::Gpu));
    assert_eq!(helpers::default_target(&registry).unwrap(), Target::Gpu);

    registry.register_backend(RecordingBackend::new(&log));
    assert_eq!(helpers::default_target(&registry).unwrap(), Target::Cpu);
}

#[test]
fn unsupported_backends_are_not_default_targets() {
    let log = EventLog::new();
    let registry = BackendRegistry::new();
    registry.register_backend(RecordingBackend::new(&log).unsupported());

    assert!(!helpers::is_target_supported(&registry, Target::Cpu));
    let err = helpers::default_target(&registry).unwrap_err();
    assert!(matches!(err, GraphError::NoSupportedTarget));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn requested_target_wins_when_available() {
    let log = EventLog::new();
    let registry = BackendRegistry::new();
    registry.register_backend(RecordingBackend::new(&log));
    registry.register_backend(RecordingBackend::new(&log).with_target(Target::Gpu));

    assert_eq!(
        helpers::resolve_target(&registry, Target::Gpu).unwrap(),
        Target::Gpu
    );
    assert_eq!(
        helpers::resolve_target(&registry, Target::Unspecified).unwrap(),
        Target::Cpu
    );
}
