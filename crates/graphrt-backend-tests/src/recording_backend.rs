use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use graphrt::backend::spec::{BackendError, BackendResult, DeviceBackend, ExecutableFunction};
use graphrt::memory::{MemoryGroup, TensorLifetime};
use graphrt::tensor::{SharedTensorHandle, TensorAccessor, TensorHandle};
use graphrt::{Graph, GraphContext, Node, Target, Tensor, TensorId};

/// Observable side effect recorded by the recording backend and its helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Initialize { backend: String },
    Validate { node: String },
    CreateTensor { tensor: TensorId },
    Configure { node: String },
    Prepare { node: String },
    Run { node: String },
    Accessor { name: String },
    Manage { tensor: TensorId },
    Unmanage { tensor: TensorId },
    Acquire,
    Release,
    Allocate { tensor: TensorId },
    Free { tensor: TensorId },
}

/// Shared, append-only event list.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.events.lock().expect("event log poisoned").push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("event log poisoned").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event log poisoned").clear();
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events
            .lock()
            .expect("event log poisoned")
            .iter()
            .filter(|event| predicate(event))
            .count()
    }

    /// Events accepted by `predicate`, in recording order.
    pub fn filtered(&self, predicate: impl Fn(&Event) -> bool) -> Vec<Event> {
        self.events
            .lock()
            .expect("event log poisoned")
            .iter()
            .filter(|event| predicate(event))
            .cloned()
            .collect()
    }

    /// Events the engine drives at execution time: accessors, runs and group acquire/release.
    pub fn execution_events(&self) -> Vec<Event> {
        self.filtered(|event| {
            matches!(
                event,
                Event::Accessor { .. } | Event::Run { .. } | Event::Acquire | Event::Release
            )
        })
    }
}

/// Accessor that only records that it ran.
#[derive(Debug, Clone)]
pub struct RecordingAccessor {
    name: String,
    log: EventLog,
}

impl RecordingAccessor {
    pub fn new(name: impl Into<String>, log: &EventLog) -> Self {
        Self {
            name: name.into(),
            log: log.clone(),
        }
    }
}

impl TensorAccessor for RecordingAccessor {
    fn access_tensor(&mut self, _handle: &dyn TensorHandle) -> anyhow::Result<()> {
        self.log.push(Event::Accessor {
            name: self.name.clone(),
        });
        Ok(())
    }
}

/// Handle without real storage that records allocation traffic.
pub struct RecordingHandle {
    tensor: TensorId,
    target: Target,
    allocated: AtomicBool,
    used: AtomicBool,
    size_in_bytes: usize,
    log: EventLog,
}

impl RecordingHandle {
    pub fn tensor(&self) -> TensorId {
        self.tensor
    }
}

impl TensorHandle for RecordingHandle {
    fn target(&self) -> Target {
        self.target
    }

    fn allocate(&self) -> BackendResult<()> {
        if !self.allocated.swap(true, Ordering::AcqRel) {
            self.log.push(Event::Allocate {
                tensor: self.tensor,
            });
        }
        Ok(())
    }

    fn free(&self) {
        if self.allocated.swap(false, Ordering::AcqRel) {
            self.log.push(Event::Free {
                tensor: self.tensor,
            });
        }
    }

    fn is_allocated(&self) -> bool {
        self.allocated.load(Ordering::Acquire)
    }

    fn is_used(&self) -> bool {
        self.used.load(Ordering::Acquire)
    }

    fn mark_as_unused(&self) {
        self.used.store(false, Ordering::Release);
    }

    fn size_in_bytes(&self) -> usize {
        self.size_in_bytes
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Function recording its prepare and run calls.
///
/// Marks the handles in `releases_on_prepare` unused when prepared, like a kernel that repacks
/// its weights.
pub struct RecordingFunction {
    node: String,
    log: EventLog,
    fail: bool,
    releases_on_prepare: Vec<SharedTensorHandle>,
}

impl ExecutableFunction for RecordingFunction {
    fn prepare(&mut self) -> BackendResult<()> {
        self.log.push(Event::Prepare {
            node: self.node.clone(),
        });
        for handle in &self.releases_on_prepare {
            handle.mark_as_unused();
        }
        Ok(())
    }

    fn run(&mut self) -> BackendResult<()> {
        self.log.push(Event::Run {
            node: self.node.clone(),
        });
        if self.fail {
            return Err(BackendError::execution(format!("{} failed", self.node)));
        }
        Ok(())
    }
}

/// Transition group recording planning and acquire/release calls.
pub struct RecordingMemoryGroup {
    log: EventLog,
    lifetimes: Mutex<Vec<TensorLifetime>>,
    handles: Mutex<Vec<SharedTensorHandle>>,
    fail_acquire: bool,
    fail_release: bool,
}

impl RecordingMemoryGroup {
    pub fn new(log: &EventLog) -> Self {
        Self {
            log: log.clone(),
            lifetimes: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            fail_acquire: false,
            fail_release: false,
        }
    }

    /// Lifetimes handed over during planning, in registration order.
    pub fn lifetimes(&self) -> Vec<TensorLifetime> {
        self.lifetimes.lock().expect("memory group poisoned").clone()
    }
}

impl MemoryGroup for RecordingMemoryGroup {
    fn manage(&self, handle: SharedTensorHandle, lifetime: TensorLifetime) -> BackendResult<()> {
        self.log.push(Event::Manage {
            tensor: lifetime.tensor,
        });
        self.lifetimes
            .lock()
            .expect("memory group poisoned")
            .push(lifetime);
        self.handles
            .lock()
            .expect("memory group poisoned")
            .push(handle);
        Ok(())
    }

    fn unmanage(&self, handle: &SharedTensorHandle) -> BackendResult<()> {
        let mut lifetimes = self.lifetimes.lock().expect("memory group poisoned");
        let mut handles = self.handles.lock().expect("memory group poisoned");
        let Some(idx) = handles
            .iter()
            .position(|managed| std::ptr::addr_eq(Arc::as_ptr(managed), Arc::as_ptr(handle)))
        else {
            return Ok(());
        };
        handles.remove(idx);
        let lifetime = lifetimes.remove(idx);
        self.log.push(Event::Unmanage {
            tensor: lifetime.tensor,
        });
        Ok(())
    }

    fn finalize_plan(&self) -> BackendResult<()> {
        Ok(())
    }

    fn acquire(&self) -> BackendResult<()> {
        self.log.push(Event::Acquire);
        if self.fail_acquire {
            return Err(BackendError::allocation("recording group refused to acquire"));
        }
        for handle in self.handles.lock().expect("memory group poisoned").iter() {
            handle.allocate()?;
        }
        Ok(())
    }

    fn release(&self) -> BackendResult<()> {
        for handle in self.handles.lock().expect("memory group poisoned").iter() {
            handle.free();
        }
        self.log.push(Event::Release);
        if self.fail_release {
            return Err(BackendError::allocation("recording group failed to release"));
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Test backend that records every engine call into an [`EventLog`].
///
/// Compute nodes compile into [`RecordingFunction`]s; structural nodes yield no function.
pub struct RecordingBackend {
    name: String,
    target: Target,
    log: EventLog,
    queued: bool,
    requires_prepare: bool,
    transition_group: bool,
    fail_acquire: bool,
    fail_release: bool,
    supported: bool,
    rejected: HashSet<String>,
    failing: HashSet<String>,
    no_function: HashSet<String>,
    releasing_inputs: HashSet<String>,
    groups: Mutex<Vec<Arc<RecordingMemoryGroup>>>,
}

impl RecordingBackend {
    pub fn new(log: &EventLog) -> Self {
        Self {
            name: "recording".to_string(),
            target: Target::Cpu,
            log: log.clone(),
            queued: false,
            requires_prepare: false,
            transition_group: true,
            fail_acquire: false,
            fail_release: false,
            supported: true,
            rejected: HashSet::new(),
            failing: HashSet::new(),
            no_function: HashSet::new(),
            releasing_inputs: HashSet::new(),
            groups: Mutex::new(Vec::new()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn queued(mut self, queued: bool) -> Self {
        self.queued = queued;
        self
    }

    pub fn requiring_prepare(mut self, requires_prepare: bool) -> Self {
        self.requires_prepare = requires_prepare;
        self
    }

    pub fn without_transition_group(mut self) -> Self {
        self.transition_group = false;
        self
    }

    /// Transition groups of this backend fail every acquire.
    pub fn failing_acquire(mut self) -> Self {
        self.fail_acquire = true;
        self
    }

    /// Transition groups of this backend fail every release.
    pub fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    /// Reports the hardware as unavailable.
    pub fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }

    /// Fails validation of the named node.
    pub fn rejecting(mut self, node: impl Into<String>) -> Self {
        self.rejected.insert(node.into());
        self
    }

    /// Compiles the named node into a function whose run fails.
    pub fn failing(mut self, node: impl Into<String>) -> Self {
        self.failing.insert(node.into());
        self
    }

    /// Compiles the named compute node into no function at all.
    pub fn without_function(mut self, node: impl Into<String>) -> Self {
        self.no_function.insert(node.into());
        self
    }

    /// The named node marks its input tensors unused when prepared.
    pub fn releasing_inputs(mut self, node: impl Into<String>) -> Self {
        self.releasing_inputs.insert(node.into());
        self
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Transition groups created so far, one per context set up against this backend.
    pub fn transition_groups(&self) -> Vec<Arc<RecordingMemoryGroup>> {
        self.groups.lock().expect("backend mutex poisoned").clone()
    }
}

impl DeviceBackend for RecordingBackend {
    fn backend_name(&self) -> &str {
        &self.name
    }

    fn target(&self) -> Target {
        self.target
    }

    fn initialize_backend(&self) {
        self.log.push(Event::Initialize {
            backend: self.name.clone(),
        });
    }

    fn is_backend_supported(&self) -> bool {
        self.supported
    }

    fn create_transition_memory_group(&self) -> Option<Arc<dyn MemoryGroup>> {
        if !self.transition_group {
            return None;
        }
        let group = Arc::new(RecordingMemoryGroup {
            fail_acquire: self.fail_acquire,
            fail_release: self.fail_release,
            ..RecordingMemoryGroup::new(&self.log)
        });
        self.groups
            .lock()
            .expect("backend mutex poisoned")
            .push(Arc::clone(&group));
        Some(group)
    }

    fn validate_node(&self, node: &Node, _graph: &Graph) -> BackendResult<()> {
        self.log.push(Event::Validate {
            node: node.name().to_string(),
        });
        if self.rejected.contains(node.name()) {
            return Err(BackendError::unsupported(
                node.name(),
                "rejected by recording backend",
            ));
        }
        Ok(())
    }

    fn create_tensor(&self, tensor: &Tensor) -> BackendResult<SharedTensorHandle> {
        self.log.push(Event::CreateTensor {
            tensor: tensor.id(),
        });
        Ok(Arc::new(RecordingHandle {
            tensor: tensor.id(),
            target: self.target,
            allocated: AtomicBool::new(false),
            used: AtomicBool::new(true),
            size_in_bytes: tensor.desc().size_in_bytes(),
            log: self.log.clone(),
        }))
    }

    fn configure_node(
        &self,
        node: &Node,
        graph: &Graph,
        _ctx: &GraphContext,
    ) -> BackendResult<Option<Box<dyn ExecutableFunction>>> {
        self.log.push(Event::Configure {
            node: node.name().to_string(),
        });
        if node.node_type().is_structural() || self.no_function.contains(node.name()) {
            return Ok(None);
        }
        let releases_on_prepare = if self.releasing_inputs.contains(node.name()) {
            node.inputs()
                .filter_map(|tensor| graph.tensor(tensor).and_then(|t| t.handle().cloned()))
                .collect()
        } else {
            Vec::new()
        };
        Ok(Some(Box::new(RecordingFunction {
            node: node.name().to_string(),
            log: self.log.clone(),
            fail: self.failing.contains(node.name()),
            releases_on_prepare,
        })))
    }

    fn requires_prepare(&self) -> bool {
        self.requires_prepare
    }

    fn queued_execution(&self) -> bool {
        self.queued
    }
}
