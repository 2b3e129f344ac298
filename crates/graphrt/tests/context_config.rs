use std::sync::Arc;

use graphrt::runtime::helpers;
use graphrt::tensor::TensorDescriptor;
use graphrt::{
    BackendRegistry, ErrorKind, GraphBuilder, GraphConfig, GraphContext, GraphError, GraphManager,
    MemoryManagerContext, Operation, PassManager, Target,
};
use graphrt_backend_tests::{EventLog, RecordingAccessor, RecordingBackend};

#[test]
fn config_defaults_enable_memory_managers() {
    let config = GraphConfig::default();
    assert!(config.use_transition_memory_manager);
    assert!(config.use_function_memory_manager);
    assert_eq!(config.num_threads, None);
}

#[test]
fn config_from_json_fills_missing_fields_with_defaults() {
    let config = GraphConfig::from_json(r#"{ "use_transition_memory_manager": false, "num_threads": 4 }"#)
        .unwrap();
    assert!(!config.use_transition_memory_manager);
    assert!(config.use_function_memory_manager);
    assert_eq!(config.num_threads, Some(4));
}

#[test]
fn malformed_config_is_a_configuration_error() {
    let err = GraphConfig::from_json("{ not json").unwrap_err();
    assert!(matches!(err, GraphError::Config(_)));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn setup_installs_one_memory_context_per_supported_backend() {
    let log = EventLog::new();
    let registry = BackendRegistry::new();
    registry.register_backend(RecordingBackend::new(&log));
    registry.register_backend(
        RecordingBackend::new(&log)
            .with_target(Target::Gpu)
            .unsupported(),
    );

    let mut ctx = GraphContext::new();
    helpers::setup_default_graph_context(&mut ctx, &registry).unwrap();

    let targets: Vec<Target> = ctx.memory_managers().map(|mm| mm.target).collect();
    assert_eq!(targets, [Target::Cpu]);
    assert!(ctx
        .memory_management_ctx(Target::Cpu)
        .unwrap()
        .cross_group
        .is_some());
    assert_eq!(ctx.transition_groups().count(), 1);
}

#[test]
fn setup_keeps_caller_supplied_memory_context() {
    let log = EventLog::new();
    let registry = BackendRegistry::new();
    registry.register_backend(RecordingBackend::new(&log));

    let mut ctx = GraphContext::new();
    let inserted = ctx
        .insert_memory_management_ctx(MemoryManagerContext {
            target: Target::Cpu,
            cross_group: None,
        })
        .unwrap();
    assert!(inserted);

    helpers::setup_default_graph_context(&mut ctx, &registry).unwrap();
    assert!(ctx
        .memory_management_ctx(Target::Cpu)
        .unwrap()
        .cross_group
        .is_none());

    let duplicate = ctx
        .insert_memory_management_ctx(MemoryManagerContext {
            target: Target::Cpu,
            cross_group: None,
        })
        .unwrap();
    assert!(!duplicate);
}

#[test]
fn disabled_transition_memory_installs_context_without_group() {
    let log = EventLog::new();
    let registry = BackendRegistry::new();
    registry.register_backend(RecordingBackend::new(&log));

    let mut ctx = GraphContext::with_config(GraphConfig {
        use_transition_memory_manager: false,
        ..GraphConfig::default()
    });
    helpers::setup_default_graph_context(&mut ctx, &registry).unwrap();

    assert!(ctx.memory_management_ctx(Target::Cpu).is_some());
    assert_eq!(ctx.transition_groups().count(), 0);
}

#[test]
fn finalize_seals_the_context() {
    let log = EventLog::new();
    let registry = Arc::new(BackendRegistry::new());
    registry.register_backend(RecordingBackend::new(&log).queued(true));
    let mut manager = GraphManager::with_registry(registry);

    let mut builder = GraphBuilder::new("sealed");
    let x = builder.input("I", TensorDescriptor::f32([1]), RecordingAccessor::new("I", &log));
    let y = builder.compute("A", Operation::Relu, &[x]).unwrap();
    builder
        .output("O", y, RecordingAccessor::new("O", &log))
        .unwrap();
    let mut graph = builder.build();

    let mut ctx = GraphContext::new();
    assert!(!ctx.is_finalized());
    manager
        .finalize_graph(&mut graph, &mut ctx, &PassManager::new(), Target::Cpu)
        .unwrap();
    assert!(ctx.is_finalized());

    let err = ctx.set_config(GraphConfig::default()).unwrap_err();
    assert!(matches!(err, GraphError::ContextSealed));
    assert_eq!(err.kind(), ErrorKind::InvariantViolation);

    let err = ctx
        .insert_memory_management_ctx(MemoryManagerContext {
            target: Target::Gpu,
            cross_group: None,
        })
        .unwrap_err();
    assert!(matches!(err, GraphError::ContextSealed));

    // A sealed context is left untouched by the default setup.
    let before = ctx.memory_managers().count();
    helpers::setup_default_graph_context(&mut ctx, manager.registry()).unwrap();
    assert_eq!(ctx.memory_managers().count(), before);
}
