use std::sync::Arc;

use graphrt::tensor::{HostSink, HostSource, TensorDescriptor};
use graphrt::{
    BackendRegistry, DeviceBackend, Graph, GraphBuilder, GraphConfig, GraphContext, GraphManager,
    Operation, PassManager, Target,
};

fn manager_for<B: DeviceBackend + 'static>(backend: B) -> (GraphManager, Target) {
    let target = backend.target();
    let registry = Arc::new(BackendRegistry::new());
    registry.register_backend(backend);
    (GraphManager::with_registry(registry), target)
}

fn finalize(manager: &mut GraphManager, graph: &mut Graph, target: Target) {
    finalize_with(manager, graph, GraphContext::new(), target);
}

fn finalize_with(
    manager: &mut GraphManager,
    graph: &mut Graph,
    mut ctx: GraphContext,
    target: Target,
) {
    manager
        .finalize_graph(graph, &mut ctx, &PassManager::new(), target)
        .expect("finalize graph");
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (idx, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() <= 1e-5, "index {idx}: {a} != {e}");
    }
}

fn latest(sink: &HostSink) -> Vec<f32> {
    sink.latest().expect("output accessor should have run")
}

pub fn identity_pipeline_round_trips<B: DeviceBackend + 'static>(backend: B) {
    let (mut manager, target) = manager_for(backend);
    let sink = HostSink::new();

    let mut builder = GraphBuilder::new("identity");
    let x = builder.input(
        "x",
        TensorDescriptor::f32([4]),
        HostSource::new(vec![1.0, 2.0, 3.0, 4.0]),
    );
    let y = builder.compute("copy", Operation::Identity, &[x]).unwrap();
    builder.output("y", y, sink.clone()).unwrap();
    let mut graph = builder.build();

    finalize(&mut manager, &mut graph, target);
    manager.execute_graph(&mut graph).unwrap();

    assert_close(&latest(&sink), &[1.0, 2.0, 3.0, 4.0]);
}

pub fn elementwise_chain_matches_expected<B: DeviceBackend + 'static>(backend: B) {
    let (mut manager, target) = manager_for(backend);
    let sink = HostSink::new();

    let mut builder = GraphBuilder::new("elementwise");
    let x = builder.input(
        "x",
        TensorDescriptor::f32([4]),
        HostSource::new(vec![-1.0, 2.0, -3.0, 4.0]),
    );
    let ones = builder.constant(
        "ones",
        TensorDescriptor::f32([4]),
        HostSource::new(vec![1.0; 4]),
    );
    let shifted = builder.compute("shift", Operation::Add, &[x, ones]).unwrap();
    let rectified = builder.compute("relu", Operation::Relu, &[shifted]).unwrap();
    let product = builder.compute("mul", Operation::Mul, &[rectified, x]).unwrap();
    let halved = builder
        .compute("half", Operation::Scale { factor: 0.5 }, &[product])
        .unwrap();
    builder.output("out", halved, sink.clone()).unwrap();
    let mut graph = builder.build();

    finalize(&mut manager, &mut graph, target);
    manager.execute_graph(&mut graph).unwrap();

    assert_close(&latest(&sink), &[0.0, 3.0, 0.0, 10.0]);
}

pub fn matmul_with_constant_weights_matches_expected<B: DeviceBackend + 'static>(backend: B) {
    let (mut manager, target) = manager_for(backend);
    let sink = HostSink::new();

    let mut builder = GraphBuilder::new("matmul");
    let x = builder.input(
        "x",
        TensorDescriptor::f32([2, 3]),
        HostSource::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
    );
    let w = builder.constant(
        "w",
        TensorDescriptor::f32([3, 2]),
        HostSource::new(vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]),
    );
    let y = builder.compute("matmul", Operation::MatMul, &[x, w]).unwrap();
    builder.output("y", y, sink.clone()).unwrap();
    let mut graph = builder.build();

    finalize(&mut manager, &mut graph, target);
    for _ in 0..2 {
        manager.execute_graph(&mut graph).unwrap();
        assert_close(&latest(&sink), &[58.0, 64.0, 139.0, 154.0]);
    }
}

pub fn repeated_execution_reads_fresh_inputs<B: DeviceBackend + 'static>(backend: B) {
    let (mut manager, target) = manager_for(backend);
    let source = HostSource::new(vec![1.0, 2.0]);
    let sink = HostSink::new();

    let mut builder = GraphBuilder::new("repeat");
    let x = builder.input("x", TensorDescriptor::f32([2]), source.clone());
    let y = builder
        .compute("double", Operation::Scale { factor: 2.0 }, &[x])
        .unwrap();
    builder.output("y", y, sink.clone()).unwrap();
    let mut graph = builder.build();

    finalize(&mut manager, &mut graph, target);
    manager.execute_graph(&mut graph).unwrap();
    assert_close(&latest(&sink), &[2.0, 4.0]);

    source.set(vec![-3.0, 0.5]);
    manager.execute_graph(&mut graph).unwrap();
    assert_close(&latest(&sink), &[-6.0, 1.0]);
}

pub fn finalize_runs_eagerly_unless_queued<B: DeviceBackend + 'static>(backend: B) {
    let queued = backend.queued_execution();
    let (mut manager, target) = manager_for(backend);
    let sink = HostSink::new();

    let mut builder = GraphBuilder::new("eager");
    let x = builder.input(
        "x",
        TensorDescriptor::f32([3]),
        HostSource::new(vec![1.0, -1.0, 2.0]),
    );
    let y = builder.compute("relu", Operation::Relu, &[x]).unwrap();
    builder.output("y", y, sink.clone()).unwrap();
    let mut graph = builder.build();

    finalize(&mut manager, &mut graph, target);

    if queued {
        assert_eq!(sink.reads(), 0);
    } else {
        assert_eq!(sink.reads(), 1);
        assert_close(&latest(&sink), &[1.0, 0.0, 2.0]);
    }
}

pub fn executes_without_transition_memory<B: DeviceBackend + 'static>(backend: B) {
    let (mut manager, target) = manager_for(backend);
    let sink = HostSink::new();

    let mut builder = GraphBuilder::new("no-transition");
    let x = builder.input(
        "x",
        TensorDescriptor::f32([2]),
        HostSource::new(vec![3.0, -4.0]),
    );
    let a = builder
        .compute("triple", Operation::Scale { factor: 3.0 }, &[x])
        .unwrap();
    let b = builder.compute("relu", Operation::Relu, &[a]).unwrap();
    builder.output("y", b, sink.clone()).unwrap();
    let mut graph = builder.build();

    let ctx = GraphContext::with_config(GraphConfig {
        use_transition_memory_manager: false,
        ..GraphConfig::default()
    });
    finalize_with(&mut manager, &mut graph, ctx, target);
    manager.execute_graph(&mut graph).unwrap();

    assert_close(&latest(&sink), &[9.0, 0.0]);
}

pub fn shared_intermediate_feeds_two_consumers<B: DeviceBackend + 'static>(backend: B) {
    let (mut manager, target) = manager_for(backend);
    let doubled = HostSink::new();
    let tripled = HostSink::new();

    let mut builder = GraphBuilder::new("fan-out");
    let x = builder.input(
        "x",
        TensorDescriptor::f32([2]),
        HostSource::new(vec![-1.0, 2.0]),
    );
    let a = builder.compute("relu", Operation::Relu, &[x]).unwrap();
    let sum = builder.compute("sum", Operation::Add, &[a, a]).unwrap();
    let scaled = builder
        .compute("triple", Operation::Scale { factor: 3.0 }, &[a])
        .unwrap();
    builder.output("doubled", sum, doubled.clone()).unwrap();
    builder.output("tripled", scaled, tripled.clone()).unwrap();
    let mut graph = builder.build();

    finalize(&mut manager, &mut graph, target);
    manager.execute_graph(&mut graph).unwrap();

    assert_close(&latest(&doubled), &[0.0, 4.0]);
    assert_close(&latest(&tripled), &[0.0, 6.0]);
}
