use anyhow::Result;
use graphrt::tensor::{HostSink, HostSource, TensorDescriptor};
use graphrt::{
    GraphBuilder, GraphConfig, GraphContext, GraphManager, Operation, PassManager, Target,
};
use serde_json::json;

fn main() -> Result<()> {
    // Links the reference CPU backend into the global registry.
    let _ = graphrt_backend_ref_cpu::register_cpu_backend;

    let config: GraphConfig = serde_json::from_value(json!({
        "use_transition_memory_manager": true
    }))?;
    let mut ctx = GraphContext::with_config(config.with_env_overrides());

    let input = HostSource::new(vec![1.0, -1.0, 0.5]);
    let output = HostSink::new();

    let mut builder = GraphBuilder::new("linear-relu");
    let x = builder.input("x", TensorDescriptor::f32([1, 3]), input.clone());
    let w = builder.constant(
        "w",
        TensorDescriptor::f32([3, 2]),
        HostSource::new(vec![0.5, -1.0, 1.0, 2.0, -2.0, 0.25]),
    );
    let bias = builder.constant(
        "b",
        TensorDescriptor::f32([1, 2]),
        HostSource::new(vec![0.1, -0.1]),
    );
    let projected = builder.compute("matmul", Operation::MatMul, &[x, w])?;
    let shifted = builder.compute("bias", Operation::Add, &[projected, bias])?;
    let activated = builder.compute("relu", Operation::Relu, &[shifted])?;
    builder.output("y", activated, output.clone())?;
    let mut graph = builder.build();

    let mut manager = GraphManager::new();
    manager.finalize_graph(&mut graph, &mut ctx, &PassManager::new(), Target::Cpu)?;
    println!("eager result: {:?}", output.latest());

    for sample in [[2.0, 0.0, 1.0], [-1.0, 3.0, 0.0]] {
        input.set(sample.to_vec());
        manager.execute_graph(&mut graph)?;
        println!(
            "{sample:?} -> {:?} in {:?}",
            output.latest().unwrap_or_default(),
            manager.last_execution_time(graph.id()).unwrap_or_default()
        );
    }

    manager.invalidate_graph(&graph)?;
    Ok(())
}
