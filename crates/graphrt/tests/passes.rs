use std::sync::{Arc, Mutex};

use graphrt::passes::{MutationType, PassResult};
use graphrt::tensor::TensorDescriptor;
use graphrt::{
    BackendRegistry, ErrorKind, Graph, GraphBuilder, GraphContext, GraphError, GraphManager,
    GraphMutator, GraphResult, NodeId, Operation, PassManager, Target,
};
use graphrt_backend_tests::{Event, EventLog, RecordingAccessor, RecordingBackend};

/// Reconnects the consumers of every identity node to its producer and drops the node.
struct EliminateIdentity;

impl GraphMutator for EliminateIdentity {
    fn name(&self) -> &'static str {
        "eliminate-identity"
    }

    fn mutate(&self, graph: &mut Graph) -> GraphResult<PassResult> {
        let identities: Vec<NodeId> = graph
            .nodes()
            .filter(|node| node.node_type().operation() == Some(&Operation::Identity))
            .map(|node| node.id())
            .collect();

        let mut removed = 0;
        for id in identities {
            let node = graph.require_node(id)?;
            let Some(source) = node.input_edge(0).and_then(|edge| graph.edge(edge)).copied() else {
                continue;
            };
            let consumers: Vec<(NodeId, usize)> = node
                .output_edges()
                .iter()
                .filter_map(|edge| graph.edge(*edge))
                .map(|edge| (edge.consumer, edge.consumer_idx))
                .collect();
            for (consumer, slot) in consumers {
                graph.add_connection(source.producer, source.producer_idx, consumer, slot)?;
            }
            graph.remove_node(id);
            removed += 1;
        }
        Ok(PassResult {
            changed: removed > 0,
            nodes_added: 0,
            nodes_removed: removed,
        })
    }
}

/// Records its name into a shared list whenever it runs.
struct Named {
    name: &'static str,
    kind: MutationType,
    seen: Arc<Mutex<Vec<&'static str>>>,
}

impl GraphMutator for Named {
    fn name(&self) -> &'static str {
        self.name
    }

    fn mutation_type(&self) -> MutationType {
        self.kind
    }

    fn mutate(&self, _graph: &mut Graph) -> GraphResult<PassResult> {
        self.seen.lock().unwrap().push(self.name);
        Ok(PassResult {
            changed: true,
            nodes_added: 1,
            nodes_removed: 0,
        })
    }
}

struct Failing;

impl GraphMutator for Failing {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn mutate(&self, _graph: &mut Graph) -> GraphResult<PassResult> {
        Err(GraphError::invalid_graph("cannot rewrite"))
    }
}

fn named(
    name: &'static str,
    kind: MutationType,
    seen: &Arc<Mutex<Vec<&'static str>>>,
) -> Arc<dyn GraphMutator> {
    Arc::new(Named {
        name,
        kind,
        seen: Arc::clone(seen),
    })
}

#[test]
fn pass_manager_runs_passes_in_order_and_merges_stats() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let passes = PassManager::new()
        .with_pass(named("first", MutationType::Ir, &seen))
        .with_pass(named("second", MutationType::Backend, &seen))
        .with_pass(named("third", MutationType::Ir, &seen));
    let mut graph = Graph::new("empty");

    let stats = passes.run_all(&mut graph).unwrap();

    assert_eq!(*seen.lock().unwrap(), ["first", "second", "third"]);
    assert!(stats.changed);
    assert_eq!(stats.nodes_added, 3);
    assert_eq!(passes.num_passes(), 3);
}

#[test]
fn run_type_only_runs_matching_passes() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let passes = PassManager::new()
        .with_pass(named("ir", MutationType::Ir, &seen))
        .with_pass(named("backend", MutationType::Backend, &seen));
    let mut graph = Graph::new("empty");

    passes.run_type(&mut graph, MutationType::Backend).unwrap();
    assert_eq!(*seen.lock().unwrap(), ["backend"]);

    let stats = passes.run(&mut graph, 7).unwrap();
    assert_eq!(stats, PassResult::unchanged());
    passes.run(&mut graph, 0).unwrap();
    assert_eq!(*seen.lock().unwrap(), ["backend", "ir"]);
}

#[test]
fn pass_list_can_be_edited() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut passes = PassManager::default();
    passes.append(named("a", MutationType::Ir, &seen));
    passes.append(named("b", MutationType::Ir, &seen));

    assert_eq!(passes.pass(1).map(|pass| pass.name()), Some("b"));
    assert_eq!(passes.pop_pass().map(|pass| pass.name()), Some("b"));
    assert_eq!(passes.passes().len(), 1);
    passes.clear();
    assert_eq!(passes.num_passes(), 0);
}

#[test]
fn pass_failure_names_the_pass_and_keeps_the_kind() {
    let passes = PassManager::new().with_pass(Arc::new(Failing));
    let mut graph = Graph::new("empty");

    let err = passes.run_all(&mut graph).unwrap_err();
    assert!(matches!(err, GraphError::Pass { pass: "failing", .. }));
    assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    assert!(err.to_string().contains("cannot rewrite"));
}

#[test]
fn finalize_runs_passes_between_tensor_configuration_and_validation() {
    let log = EventLog::new();
    let registry = Arc::new(BackendRegistry::new());
    registry.register_backend(RecordingBackend::new(&log).queued(true));
    let mut manager = GraphManager::with_registry(registry);

    let mut builder = GraphBuilder::new("identity-elimination");
    let x = builder.input("I", TensorDescriptor::f32([4]), RecordingAccessor::new("I", &log));
    let a = builder.compute("A", Operation::Identity, &[x]).unwrap();
    let b = builder.compute("B", Operation::Relu, &[a]).unwrap();
    builder
        .output("O", b, RecordingAccessor::new("O", &log))
        .unwrap();
    let mut graph = builder.build();
    let tensors_before = graph.num_tensors();

    let passes = PassManager::new().with_pass(Arc::new(EliminateIdentity));
    let mut ctx = GraphContext::new();
    manager
        .finalize_graph(&mut graph, &mut ctx, &passes, Target::Cpu)
        .unwrap();

    // Every tensor was configured before the pass removed the identity output.
    assert_eq!(
        log.count(|event| matches!(event, Event::CreateTensor { .. })),
        tensors_before
    );
    assert_eq!(
        log.count(|event| *event
            == Event::Validate {
                node: "A".to_string()
            }),
        0
    );
    let workload = manager.workload(graph.id()).unwrap();
    let names: Vec<&str> = workload.tasks().iter().map(|task| task.name()).collect();
    assert_eq!(names, ["B"]);

    let relu = graph.node(b.node).unwrap();
    assert_eq!(relu.input(0), graph.node(x.node).unwrap().output(0));
}
