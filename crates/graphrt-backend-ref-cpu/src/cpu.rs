use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use graphrt::backend::spec::{BackendError, BackendResult, DeviceBackend, ExecutableFunction};
use graphrt::memory::MemoryGroup;
use graphrt::tensor::{DType, SharedTensorHandle, TensorHandle};
use graphrt::{Graph, GraphContext, Node, NodeType, Operation, Target, Tensor, TensorId};
use tracing::trace;

use crate::memory::CpuMemoryGroup;

/// Host buffer backing one or more CPU tensors.
pub(crate) type Buffer = Arc<Mutex<Vec<f32>>>;

/// f32 storage on the host.
///
/// The buffer is either owned (allocated individually) or a pooled slot bound by a
/// [`CpuMemoryGroup`]. Pooled slots may be longer than the tensor; only the first
/// `num_elements` values belong to it.
pub struct CpuTensorHandle {
    num_elements: usize,
    storage: Mutex<Option<Buffer>>,
    used: AtomicBool,
}

impl CpuTensorHandle {
    pub fn new(num_elements: usize) -> Self {
        Self {
            num_elements,
            storage: Mutex::new(None),
            used: AtomicBool::new(true),
        }
    }

    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    pub(crate) fn bind_buffer(&self, buffer: Buffer) {
        *self.storage.lock().expect("cpu tensor mutex poisoned") = Some(buffer);
    }

    fn buffer(&self) -> BackendResult<Buffer> {
        self.storage
            .lock()
            .expect("cpu tensor mutex poisoned")
            .clone()
            .ok_or_else(|| BackendError::allocation("cpu tensor has no storage"))
    }

    fn read(&self) -> BackendResult<Vec<f32>> {
        let buffer = self.buffer()?;
        let data = buffer.lock().expect("cpu buffer mutex poisoned");
        Ok(data[..self.num_elements].to_vec())
    }

    fn write(&self, values: &[f32]) -> BackendResult<()> {
        if values.len() != self.num_elements {
            return Err(BackendError::execution(format!(
                "expected {} values, got {}",
                self.num_elements,
                values.len()
            )));
        }
        let buffer = self.buffer()?;
        let mut data = buffer.lock().expect("cpu buffer mutex poisoned");
        data[..self.num_elements].copy_from_slice(values);
        Ok(())
    }
}

impl TensorHandle for CpuTensorHandle {
    fn target(&self) -> Target {
        Target::Cpu
    }

    fn allocate(&self) -> BackendResult<()> {
        let mut storage = self.storage.lock().expect("cpu tensor mutex poisoned");
        if storage.is_none() {
            *storage = Some(Arc::new(Mutex::new(vec![0.0; self.num_elements])));
        }
        Ok(())
    }

    fn free(&self) {
        self.storage.lock().expect("cpu tensor mutex poisoned").take();
    }

    fn is_allocated(&self) -> bool {
        self.storage
            .lock()
            .expect("cpu tensor mutex poisoned")
            .is_some()
    }

    fn is_used(&self) -> bool {
        self.used.load(Ordering::Acquire)
    }

    fn mark_as_unused(&self) {
        self.used.store(false, Ordering::Release);
    }

    fn size_in_bytes(&self) -> usize {
        self.num_elements * DType::F32.size_in_bytes()
    }

    fn copy_from_host(&self, data: &[f32]) -> BackendResult<()> {
        self.write(data)
    }

    fn copy_to_host(&self) -> BackendResult<Vec<f32>> {
        self.read()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Reference f32 backend running every kernel on the calling thread.
#[derive(Debug, Clone, Default)]
pub struct CpuBackend {
    prepare_during_finalize: bool,
    queued: bool,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepares every function during finalization instead of lazily on its first run.
    pub fn with_prepare_during_finalize(mut self, enabled: bool) -> Self {
        self.prepare_during_finalize = enabled;
        self
    }

    /// Skips the eager first run during finalization.
    pub fn with_queued_execution(mut self, queued: bool) -> Self {
        self.queued = queued;
        self
    }
}

fn tensor_of(graph: &Graph, id: TensorId) -> BackendResult<&Tensor> {
    graph
        .tensor(id)
        .ok_or_else(|| BackendError::execution(format!("tensor {id} is not part of the graph")))
}

fn handle_of(graph: &Graph, id: TensorId) -> BackendResult<SharedTensorHandle> {
    tensor_of(graph, id)?
        .handle()
        .cloned()
        .ok_or_else(|| BackendError::execution(format!("tensor {id} has no handle")))
}

fn connected_inputs(node: &Node, op: &Operation) -> BackendResult<Vec<TensorId>> {
    (0..op.arity())
        .map(|idx| {
            node.input(idx).ok_or_else(|| {
                BackendError::unsupported(
                    op.name(),
                    format!("input {idx} of '{}' is not connected", node.name()),
                )
            })
        })
        .collect()
}

fn sole_output(node: &Node, op: &Operation) -> BackendResult<TensorId> {
    node.output(0).ok_or_else(|| {
        BackendError::unsupported(op.name(), format!("'{}' has no output tensor", node.name()))
    })
}

fn is_constant(graph: &Graph, tensor: TensorId) -> bool {
    graph.nodes().any(|node| {
        *node.node_type() == NodeType::Const && node.outputs().any(|output| output == tensor)
    })
}

impl DeviceBackend for CpuBackend {
    fn backend_name(&self) -> &str {
        "cpu-ref"
    }

    fn target(&self) -> Target {
        Target::Cpu
    }

    fn create_transition_memory_group(&self) -> Option<Arc<dyn MemoryGroup>> {
        Some(Arc::new(CpuMemoryGroup::new()))
    }

    fn validate_node(&self, node: &Node, graph: &Graph) -> BackendResult<()> {
        for tensor in node.inputs().chain(node.outputs()) {
            let dtype = tensor_of(graph, tensor)?.desc().dtype;
            if dtype != DType::F32 {
                return Err(BackendError::unsupported(
                    node.name(),
                    format!("dtype {dtype:?} of tensor {tensor}"),
                ));
            }
        }

        let Some(op) = node.node_type().operation() else {
            return Ok(());
        };
        let inputs = connected_inputs(node, op)?;
        let output = tensor_of(graph, sole_output(node, op)?)?.desc();

        match op {
            Operation::Custom(name) => Err(BackendError::unsupported(
                name.to_string(),
                "no reference kernel for custom operations",
            )),
            Operation::MatMul => {
                let lhs = tensor_of(graph, inputs[0])?.desc().shape.dims();
                let rhs = tensor_of(graph, inputs[1])?.desc().shape.dims();
                match (lhs, rhs) {
                    ([m, k], [k2, n]) if k == k2 && output.shape.dims() == [*m, *n] => Ok(()),
                    _ => Err(BackendError::unsupported(
                        "matmul",
                        format!("shapes {lhs:?} x {rhs:?} -> {:?}", output.shape.dims()),
                    )),
                }
            }
            _ => {
                for input in &inputs {
                    let elements = tensor_of(graph, *input)?.desc().num_elements();
                    if elements != output.num_elements() {
                        return Err(BackendError::unsupported(
                            op.name(),
                            format!(
                                "input has {elements} elements, output has {}",
                                output.num_elements()
                            ),
                        ));
                    }
                }
                Ok(())
            }
        }
    }

    fn create_tensor(&self, tensor: &Tensor) -> BackendResult<SharedTensorHandle> {
        let desc = tensor.desc();
        if desc.dtype != DType::F32 {
            return Err(BackendError::unsupported(
                "create_tensor",
                format!("dtype {:?}", desc.dtype),
            ));
        }
        Ok(Arc::new(CpuTensorHandle::new(desc.num_elements())))
    }

    fn configure_node(
        &self,
        node: &Node,
        graph: &Graph,
        ctx: &GraphContext,
    ) -> BackendResult<Option<Box<dyn ExecutableFunction>>> {
        let Some(op) = node.node_type().operation() else {
            return Ok(None);
        };
        let inputs = connected_inputs(node, op)?;
        let output = handle_of(graph, sole_output(node, op)?)?;

        let function: Box<dyn ExecutableFunction> = match op {
            Operation::Identity => Box::new(UnaryFunction::new(
                UnaryKind::Identity,
                handle_of(graph, inputs[0])?,
                output,
            )),
            Operation::Relu => Box::new(UnaryFunction::new(
                UnaryKind::Relu,
                handle_of(graph, inputs[0])?,
                output,
            )),
            Operation::Scale { factor } => Box::new(UnaryFunction::new(
                UnaryKind::Scale(*factor),
                handle_of(graph, inputs[0])?,
                output,
            )),
            Operation::Add => Box::new(BinaryFunction {
                kind: BinaryKind::Add,
                lhs: handle_of(graph, inputs[0])?,
                rhs: handle_of(graph, inputs[1])?,
                output,
            }),
            Operation::Mul => Box::new(BinaryFunction {
                kind: BinaryKind::Mul,
                lhs: handle_of(graph, inputs[0])?,
                rhs: handle_of(graph, inputs[1])?,
                output,
            }),
            Operation::MatMul => {
                let lhs = tensor_of(graph, inputs[0])?.desc().shape.dims().to_vec();
                let rhs = tensor_of(graph, inputs[1])?.desc().shape.dims().to_vec();
                let (m, k, n) = match (lhs.as_slice(), rhs.as_slice()) {
                    ([m, k], [_, n]) => (*m, *k, *n),
                    _ => return Err(BackendError::unsupported("matmul", "rank-2 operands only")),
                };
                Box::new(MatMulFunction {
                    lhs: handle_of(graph, inputs[0])?,
                    rhs: handle_of(graph, inputs[1])?,
                    output,
                    m,
                    k,
                    n,
                    threads: ctx.config().num_threads.unwrap_or(1).clamp(1, m.max(1)),
                    // Cached packed weights count as function-internal memory.
                    constant_rhs: ctx.config().use_function_memory_manager
                        && is_constant(graph, inputs[1]),
                    packed: None,
                })
            }
            Operation::Custom(name) => {
                return Err(BackendError::unsupported(
                    name.to_string(),
                    "no reference kernel for custom operations",
                ))
            }
        };
        trace!(node = node.name(), op = op.name(), "configured cpu function");
        Ok(Some(function))
    }

    fn requires_prepare(&self) -> bool {
        self.prepare_during_finalize
    }

    fn queued_execution(&self) -> bool {
        self.queued
    }
}

#[derive(Debug, Clone, Copy)]
enum UnaryKind {
    Identity,
    Relu,
    Scale(f32),
}

struct UnaryFunction {
    kind: UnaryKind,
    input: SharedTensorHandle,
    output: SharedTensorHandle,
}

impl UnaryFunction {
    fn new(kind: UnaryKind, input: SharedTensorHandle, output: SharedTensorHandle) -> Self {
        Self {
            kind,
            input,
            output,
        }
    }
}

impl ExecutableFunction for UnaryFunction {
    fn run(&mut self) -> BackendResult<()> {
        let mut values = self.input.copy_to_host()?;
        match self.kind {
            UnaryKind::Identity => {}
            UnaryKind::Relu => values.iter_mut().for_each(|v| *v = v.max(0.0)),
            UnaryKind::Scale(factor) => values.iter_mut().for_each(|v| *v *= factor),
        }
        self.output.copy_from_host(&values)
    }
}

#[derive(Debug, Clone, Copy)]
enum BinaryKind {
    Add,
    Mul,
}

struct BinaryFunction {
    kind: BinaryKind,
    lhs: SharedTensorHandle,
    rhs: SharedTensorHandle,
    output: SharedTensorHandle,
}

impl ExecutableFunction for BinaryFunction {
    fn run(&mut self) -> BackendResult<()> {
        let lhs = self.lhs.copy_to_host()?;
        let rhs = self.rhs.copy_to_host()?;
        let values: Vec<f32> = match self.kind {
            BinaryKind::Add => lhs.iter().zip(&rhs).map(|(a, b)| a + b).collect(),
            BinaryKind::Mul => lhs.iter().zip(&rhs).map(|(a, b)| a * b).collect(),
        };
        self.output.copy_from_host(&values)
    }
}

/// `[m, k] x [k, n]` with the right operand packed column-major.
///
/// A constant right operand is packed once; its original storage is marked unused afterwards so
/// it can be reclaimed. Output rows are split across `threads` scoped workers.
struct MatMulFunction {
    lhs: SharedTensorHandle,
    rhs: SharedTensorHandle,
    output: SharedTensorHandle,
    m: usize,
    k: usize,
    n: usize,
    threads: usize,
    constant_rhs: bool,
    packed: Option<Vec<f32>>,
}

impl MatMulFunction {
    fn pack(&self) -> BackendResult<Vec<f32>> {
        let rhs = self.rhs.copy_to_host()?;
        let mut packed = vec![0.0; self.k * self.n];
        for row in 0..self.k {
            for col in 0..self.n {
                packed[col * self.k + row] = rhs[row * self.n + col];
            }
        }
        Ok(packed)
    }
}

impl ExecutableFunction for MatMulFunction {
    fn prepare(&mut self) -> BackendResult<()> {
        if !self.constant_rhs || self.packed.is_some() {
            return Ok(());
        }
        self.packed = Some(self.pack()?);
        self.rhs.mark_as_unused();
        trace!(k = self.k, n = self.n, "packed constant matmul weights");
        Ok(())
    }

    fn run(&mut self) -> BackendResult<()> {
        self.prepare()?;
        let fresh;
        let packed = match &self.packed {
            Some(packed) => packed,
            None => {
                fresh = self.pack()?;
                &fresh
            }
        };

        let lhs = self.lhs.copy_to_host()?;
        let mut out = vec![0.0; self.m * self.n];
        let (k, n) = (self.k, self.n);
        if self.threads <= 1 || k == 0 || n == 0 {
            matmul_rows(&lhs, packed, &mut out, k, n);
        } else {
            let rows_per_worker = self.m.div_ceil(self.threads);
            std::thread::scope(|scope| {
                for (lhs_rows, out_rows) in lhs
                    .chunks(rows_per_worker * k)
                    .zip(out.chunks_mut(rows_per_worker * n))
                {
                    scope.spawn(move || matmul_rows(lhs_rows, packed, out_rows, k, n));
                }
            });
        }
        self.output.copy_from_host(&out)
    }
}

fn matmul_rows(lhs: &[f32], packed: &[f32], out: &mut [f32], k: usize, n: usize) {
    for (i, out_row) in out.chunks_mut(n).enumerate() {
        let row = &lhs[i * k..(i + 1) * k];
        for (j, value) in out_row.iter_mut().enumerate() {
            let col = &packed[j * k..(j + 1) * k];
            *value = row.iter().zip(col).map(|(a, b)| a * b).sum();
        }
    }
}
