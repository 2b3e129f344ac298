//! Boundary callbacks that move data between host code and tensor storage.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::TensorHandle;

/// Callback attached to a tensor that moves data across the graph boundary.
///
/// Accessors run at well-defined points: constant population during finalization, input pull
/// before every execution and output push after every execution. The handle is mapped for the
/// duration of the call.
pub trait TensorAccessor: Send {
    fn access_tensor(&mut self, handle: &dyn TensorHandle) -> Result<()>;
}

impl<F> TensorAccessor for F
where
    F: FnMut(&dyn TensorHandle) -> Result<()> + Send,
{
    fn access_tensor(&mut self, handle: &dyn TensorHandle) -> Result<()> {
        self(handle)
    }
}

/// Feeds a shared host buffer into the tensor on every access.
///
/// Clones share the same buffer, so callers keep one clone to update the data between runs.
#[derive(Clone, Default)]
pub struct HostSource {
    data: Arc<Mutex<Vec<f32>>>,
}

impl HostSource {
    pub fn new(data: Vec<f32>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
        }
    }

    pub fn set(&self, data: Vec<f32>) {
        *self.data.lock().expect("host source mutex poisoned") = data;
    }
}

impl TensorAccessor for HostSource {
    fn access_tensor(&mut self, handle: &dyn TensorHandle) -> Result<()> {
        let data = self.data.lock().map_err(|_| anyhow!("host source mutex poisoned"))?;
        handle.copy_from_host(&data)?;
        Ok(())
    }
}

/// Captures the tensor contents on every access.
#[derive(Clone, Default)]
pub struct HostSink {
    data: Arc<Mutex<Option<Vec<f32>>>>,
    reads: Arc<Mutex<usize>>,
}

impl HostSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the data captured by the most recent access.
    pub fn latest(&self) -> Option<Vec<f32>> {
        self.data.lock().expect("host sink mutex poisoned").clone()
    }

    /// Number of times the sink was invoked.
    pub fn reads(&self) -> usize {
        *self.reads.lock().expect("host sink mutex poisoned")
    }
}

impl TensorAccessor for HostSink {
    fn access_tensor(&mut self, handle: &dyn TensorHandle) -> Result<()> {
        let values = handle.copy_to_host()?;
        *self.data.lock().map_err(|_| anyhow!("host sink mutex poisoned"))? = Some(values);
        *self.reads.lock().map_err(|_| anyhow!("host sink mutex poisoned"))? += 1;
        Ok(())
    }
}
