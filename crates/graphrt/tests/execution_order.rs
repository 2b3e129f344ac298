use std::sync::Arc;

use graphrt::tensor::TensorDescriptor;
use graphrt::{
    BackendRegistry, Graph, GraphBuilder, GraphContext, GraphManager, Operation, PassManager,
    Target, TensorId,
};
use graphrt_backend_tests::{Event, EventLog, RecordingAccessor, RecordingBackend};

fn manager_with(backend: RecordingBackend) -> GraphManager {
    let registry = Arc::new(BackendRegistry::new());
    registry.register_backend(backend);
    GraphManager::with_registry(registry)
}

fn finalize(manager: &mut GraphManager, graph: &mut Graph) {
    let mut ctx = GraphContext::new();
    manager
        .finalize_graph(graph, &mut ctx, &PassManager::new(), Target::Cpu)
        .unwrap();
}

fn accessor(name: &str) -> Event {
    Event::Accessor {
        name: name.to_string(),
    }
}

fn run(node: &str) -> Event {
    Event::Run {
        node: node.to_string(),
    }
}

fn position(events: &[Event], event: &Event) -> usize {
    events
        .iter()
        .position(|candidate| candidate == event)
        .unwrap_or_else(|| panic!("{event:?} not recorded"))
}

fn identity_graph(log: &EventLog) -> Graph {
    let mut builder = GraphBuilder::new("identity");
    let x = builder.input("I", TensorDescriptor::f32([4]), RecordingAccessor::new("I", log));
    let a = builder.compute("A", Operation::Identity, &[x]).unwrap();
    builder
        .output("O", a, RecordingAccessor::new("O", log))
        .unwrap();
    builder.build()
}

#[test]
fn execute_pulls_inputs_runs_tasks_then_pushes_outputs() {
    let log = EventLog::new();
    let mut manager = manager_with(RecordingBackend::new(&log).queued(true));
    let mut graph = identity_graph(&log);

    finalize(&mut manager, &mut graph);
    assert!(log.execution_events().is_empty());

    manager.execute_graph(&mut graph).unwrap();
    assert_eq!(
        log.execution_events(),
        [accessor("I"), Event::Acquire, run("A"), Event::Release, accessor("O")]
    );

    log.clear();
    manager.execute_graph(&mut graph).unwrap();
    assert_eq!(
        log.execution_events(),
        [accessor("I"), Event::Acquire, run("A"), Event::Release, accessor("O")]
    );
}

#[test]
fn eager_target_executes_once_during_finalize() {
    let log = EventLog::new();
    let mut manager = manager_with(RecordingBackend::new(&log));
    let mut graph = identity_graph(&log);

    finalize(&mut manager, &mut graph);

    assert_eq!(log.count(|event| *event == accessor("I")), 1);
    assert_eq!(log.count(|event| *event == run("A")), 1);
    assert_eq!(log.count(|event| *event == accessor("O")), 1);
    assert!(manager.last_execution_time(graph.id()).is_some());
}

#[test]
fn queued_target_waits_for_explicit_execute() {
    let log = EventLog::new();
    let mut manager = manager_with(RecordingBackend::new(&log).queued(true));
    let mut graph = identity_graph(&log);

    finalize(&mut manager, &mut graph);

    assert_eq!(log.count(|event| matches!(event, Event::Run { .. })), 0);
    assert!(manager.last_execution_time(graph.id()).is_none());
}

#[test]
fn zero_task_graph_still_brackets_memory_group() {
    let log = EventLog::new();
    let mut manager = manager_with(RecordingBackend::new(&log).queued(true));

    let mut builder = GraphBuilder::new("passthrough");
    let x = builder.input("I", TensorDescriptor::f32([4]), RecordingAccessor::new("I", &log));
    builder
        .output("O", x, RecordingAccessor::new("O", &log))
        .unwrap();
    let mut graph = builder.build();

    finalize(&mut manager, &mut graph);
    assert!(manager.workload(graph.id()).unwrap().tasks().is_empty());

    manager.execute_graph(&mut graph).unwrap();
    assert_eq!(
        log.execution_events(),
        [accessor("I"), Event::Acquire, Event::Release, accessor("O")]
    );
}

#[test]
fn backend_without_transition_group_skips_acquire_and_release() {
    let log = EventLog::new();
    let mut manager = manager_with(
        RecordingBackend::new(&log)
            .queued(true)
            .without_transition_group(),
    );
    let mut graph = identity_graph(&log);

    finalize(&mut manager, &mut graph);
    manager.execute_graph(&mut graph).unwrap();

    assert_eq!(
        log.execution_events(),
        [accessor("I"), run("A"), accessor("O")]
    );
}

fn graph_with_constant(log: &EventLog) -> (Graph, TensorId) {
    let mut builder = GraphBuilder::new("constant");
    let x = builder.input("I", TensorDescriptor::f32([4]), RecordingAccessor::new("I", log));
    let c = builder.constant("C", TensorDescriptor::f32([4]), RecordingAccessor::new("C", log));
    let b = builder.compute("B", Operation::Add, &[x, c]).unwrap();
    builder
        .output("O", b, RecordingAccessor::new("O", log))
        .unwrap();
    let graph = builder.build();
    let constant = graph.node(c.node).unwrap().output(0).unwrap();
    (graph, constant)
}

#[test]
fn constant_accessor_runs_once_during_finalize() {
    let log = EventLog::new();
    let mut manager = manager_with(
        RecordingBackend::new(&log)
            .queued(true)
            .requiring_prepare(true),
    );
    let (mut graph, constant) = graph_with_constant(&log);

    finalize(&mut manager, &mut graph);

    let events = log.events();
    let populated = position(&events, &accessor("C"));
    let configured = position(
        &events,
        &Event::Configure {
            node: "O".to_string(),
        },
    );
    let allocated = position(&events, &Event::Allocate { tensor: constant });
    let prepared = position(
        &events,
        &Event::Prepare {
            node: "B".to_string(),
        },
    );
    assert!(configured < allocated);
    assert!(allocated < populated);
    assert!(populated < prepared);

    for _ in 0..3 {
        manager.execute_graph(&mut graph).unwrap();
    }
    assert_eq!(log.count(|event| *event == accessor("C")), 1);
    assert_eq!(log.count(|event| *event == accessor("I")), 3);
}

#[test]
fn finalize_steps_run_in_pipeline_order() {
    let log = EventLog::new();
    let mut manager = manager_with(RecordingBackend::new(&log).queued(true));
    let (mut graph, _) = graph_with_constant(&log);

    finalize(&mut manager, &mut graph);

    let events = log.events();
    let last_create = events
        .iter()
        .rposition(|event| matches!(event, Event::CreateTensor { .. }))
        .unwrap();
    let first_validate = position(
        &events,
        &Event::Validate {
            node: "I".to_string(),
        },
    );
    let last_validate = events
        .iter()
        .rposition(|event| matches!(event, Event::Validate { .. }))
        .unwrap();
    let first_configure = position(
        &events,
        &Event::Configure {
            node: "I".to_string(),
        },
    );
    assert!(last_create < first_validate);
    assert!(last_validate < first_configure);
    assert_eq!(log.count(|event| matches!(event, Event::Prepare { .. })), 0);
}

#[test]
fn prepare_reclaims_tensors_marked_unused() {
    let log = EventLog::new();
    let mut manager = manager_with(
        RecordingBackend::new(&log)
            .queued(true)
            .requiring_prepare(true)
            .releasing_inputs("B"),
    );

    let mut builder = GraphBuilder::new("reclaim");
    let c = builder.constant("C", TensorDescriptor::f32([4]), RecordingAccessor::new("C", &log));
    let b = builder.compute("B", Operation::Identity, &[c]).unwrap();
    builder
        .output("O", b, RecordingAccessor::new("O", &log))
        .unwrap();
    let mut graph = builder.build();
    let constant = graph.node(c.node).unwrap().output(0).unwrap();

    finalize(&mut manager, &mut graph);

    let events = log.events();
    let prepared = position(
        &events,
        &Event::Prepare {
            node: "B".to_string(),
        },
    );
    let freed = position(&events, &Event::Free { tensor: constant });
    assert!(prepared < freed);

    let handle = graph.tensor(constant).unwrap().handle().unwrap();
    assert!(!handle.is_allocated());
    assert!(!handle.is_used());
}

#[test]
fn unconsumed_constant_is_still_populated_once() {
    let log = EventLog::new();
    let mut manager = manager_with(RecordingBackend::new(&log).queued(true));

    let mut builder = GraphBuilder::new("dangling-constant");
    let x = builder.input("I", TensorDescriptor::f32([4]), RecordingAccessor::new("I", &log));
    let c = builder.constant("C", TensorDescriptor::f32([4]), RecordingAccessor::new("C", &log));
    let a = builder.compute("A", Operation::Identity, &[x]).unwrap();
    builder
        .output("O", a, RecordingAccessor::new("O", &log))
        .unwrap();
    let mut graph = builder.build();
    let constant = graph.node(c.node).unwrap().output(0).unwrap();
    assert!(graph.tensor(constant).unwrap().bound_edges().is_empty());

    finalize(&mut manager, &mut graph);
    assert_eq!(log.count(|event| *event == accessor("C")), 1);
    let events = log.events();
    assert!(
        position(&events, &Event::Allocate { tensor: constant }) < position(&events, &accessor("C"))
    );

    manager.execute_graph(&mut graph).unwrap();
    manager.execute_graph(&mut graph).unwrap();
    assert_eq!(log.count(|event| *event == accessor("C")), 1);
}

#[test]
fn pass_through_graph_keeps_input_and_output_accessors_apart() {
    let log = EventLog::new();
    let mut manager = manager_with(RecordingBackend::new(&log).queued(true));

    let mut builder = GraphBuilder::new("pass-through");
    let x = builder.input("I", TensorDescriptor::f32([2]), RecordingAccessor::new("I", &log));
    let c = builder.constant("C", TensorDescriptor::f32([2]), RecordingAccessor::new("C", &log));
    builder
        .output("O1", x, RecordingAccessor::new("O1", &log))
        .unwrap();
    builder
        .output("O2", c, RecordingAccessor::new("O2", &log))
        .unwrap();
    let mut graph = builder.build();

    finalize(&mut manager, &mut graph);
    assert_eq!(log.execution_events(), [accessor("C")]);

    log.clear();
    manager.execute_graph(&mut graph).unwrap();
    assert_eq!(
        log.execution_events(),
        [
            accessor("I"),
            Event::Acquire,
            Event::Release,
            accessor("O1"),
            accessor("O2")
        ]
    );
}
