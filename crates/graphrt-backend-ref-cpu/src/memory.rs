use std::any::Any;
use std::sync::{Arc, Mutex};

use graphrt::backend::spec::{BackendError, BackendResult};
use graphrt::memory::{MemoryGroup, TensorLifetime};
use graphrt::tensor::{DType, SharedTensorHandle};
use tracing::debug;

use crate::cpu::{Buffer, CpuTensorHandle};

struct Managed {
    handle: SharedTensorHandle,
    lifetime: TensorLifetime,
    slot: usize,
}

#[derive(Default)]
struct PoolState {
    managed: Vec<Managed>,
    /// Element capacity of each slot.
    slots: Vec<usize>,
    planned: bool,
    buffers: Vec<Buffer>,
}

/// Transition group sharing host buffers between CPU tensors with disjoint lifetimes.
///
/// Planning assigns every managed tensor to a slot greedily by start index; a slot is reused once
/// the previous occupant's lifetime has ended. `acquire` creates one buffer per slot and binds
/// every managed handle to its slot's buffer; `release` unbinds them and drops the buffers.
#[derive(Default)]
pub struct CpuMemoryGroup {
    state: Mutex<PoolState>,
}

impl CpuMemoryGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_managed(&self) -> usize {
        self.state.lock().expect("cpu memory group poisoned").managed.len()
    }

    pub fn num_slots(&self) -> usize {
        self.state.lock().expect("cpu memory group poisoned").slots.len()
    }

    /// Total pooled storage in bytes once acquired.
    pub fn pool_size_in_bytes(&self) -> usize {
        let state = self.state.lock().expect("cpu memory group poisoned");
        state.slots.iter().sum::<usize>() * DType::F32.size_in_bytes()
    }
}

fn elements_of(handle: &SharedTensorHandle) -> BackendResult<usize> {
    handle
        .as_any()
        .downcast_ref::<CpuTensorHandle>()
        .map(CpuTensorHandle::num_elements)
        .ok_or_else(|| BackendError::allocation("cpu memory group can only manage cpu tensors"))
}

fn same_handle(a: &SharedTensorHandle, b: &SharedTensorHandle) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl MemoryGroup for CpuMemoryGroup {
    fn manage(&self, handle: SharedTensorHandle, lifetime: TensorLifetime) -> BackendResult<()> {
        elements_of(&handle)?;
        let mut state = self.state.lock().expect("cpu memory group poisoned");
        // Managing more tensors reopens the plan.
        state.planned = false;
        state.managed.push(Managed {
            handle,
            lifetime,
            slot: 0,
        });
        Ok(())
    }

    fn unmanage(&self, handle: &SharedTensorHandle) -> BackendResult<()> {
        let mut state = self.state.lock().expect("cpu memory group poisoned");
        let before = state.managed.len();
        state
            .managed
            .retain(|managed| !same_handle(&managed.handle, handle));
        if state.managed.len() != before {
            state.planned = false;
        }
        Ok(())
    }

    fn finalize_plan(&self) -> BackendResult<()> {
        let mut state = self.state.lock().expect("cpu memory group poisoned");
        if state.planned {
            return Ok(());
        }
        let state = &mut *state;
        state.slots.clear();
        state.managed.sort_by_key(|managed| managed.lifetime.start);

        // Last task index at which each slot is still occupied.
        let mut busy_until: Vec<usize> = Vec::new();
        for managed in &mut state.managed {
            let elements = elements_of(&managed.handle)?;
            let free = busy_until
                .iter()
                .position(|end| *end < managed.lifetime.start);
            let slot = match free {
                Some(slot) => slot,
                None => {
                    busy_until.push(0);
                    state.slots.push(0);
                    busy_until.len() - 1
                }
            };
            busy_until[slot] = managed.lifetime.end;
            state.slots[slot] = state.slots[slot].max(elements);
            managed.slot = slot;
        }
        state.planned = true;

        debug!(
            tensors = state.managed.len(),
            slots = state.slots.len(),
            "planned cpu transition memory"
        );
        Ok(())
    }

    fn acquire(&self) -> BackendResult<()> {
        let mut state = self.state.lock().expect("cpu memory group poisoned");
        if !state.planned {
            return Err(BackendError::allocation(
                "cpu memory group acquired before planning",
            ));
        }
        let state = &mut *state;
        state.buffers = state
            .slots
            .iter()
            .map(|elements| Arc::new(Mutex::new(vec![0.0; *elements])))
            .collect();
        for managed in &state.managed {
            if let Some(handle) = managed.handle.as_any().downcast_ref::<CpuTensorHandle>() {
                handle.bind_buffer(Arc::clone(&state.buffers[managed.slot]));
            }
        }
        Ok(())
    }

    fn release(&self) -> BackendResult<()> {
        let mut state = self.state.lock().expect("cpu memory group poisoned");
        for managed in &state.managed {
            managed.handle.free();
        }
        state.buffers.clear();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
