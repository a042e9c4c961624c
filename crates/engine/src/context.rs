//! Run context
//!
//! `KmsContext` is passed explicitly to every engine and scenario function.
//! It owns the device handle, the discovered model with its staged values,
//! the buffers allocated for the run, and the flip events collected from
//! successful commits. Dropping it releases every blob and buffer it
//! created; descriptors are released by their guards.

use crate::config::ProbeConfig;
use crate::error::{VerifyError, VerifyResult};
use crate::model::{DisplayModel, PipeHandle};
use kmsprobe_core::{FbId, PixelFormat, MOD_LINEAR};
use kmsprobe_device::{Buffer, DisplayDevice, FdGuard, FlipEvent, Platform, SimDevice};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything one verification run needs
pub struct KmsContext<P: Platform + 'static> {
    pub(crate) device: Arc<P>,
    pub(crate) config: ProbeConfig,
    pub(crate) model: DisplayModel,
    pub(crate) buffers: BTreeMap<FbId, Buffer>,
    pub(crate) events: Vec<FlipEvent>,
}

impl<P: Platform + 'static> KmsContext<P> {
    /// Discover the device and seed the staged state from it
    pub fn new(device: Arc<P>, config: ProbeConfig) -> VerifyResult<Self> {
        config.validate()?;
        let model = DisplayModel::discover(&*device)?;
        info!(
            target: "kmsprobe::scenario",
            pipes = model.pipes.len(),
            planes = model.planes.len(),
            outputs = model.outputs.len(),
            "display discovered"
        );
        Ok(KmsContext {
            device,
            config,
            model,
            buffers: BTreeMap::new(),
            events: Vec::new(),
        })
    }

    /// Device under test
    pub fn device(&self) -> &P {
        &self.device
    }

    /// Device handle usable by descriptor guards
    pub fn shared_device(&self) -> Arc<dyn DisplayDevice> {
        self.device.clone()
    }

    /// Run configuration
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Discovered objects and staged values
    pub fn model(&self) -> &DisplayModel {
        &self.model
    }

    /// Pipeline by position, `Unsupported` when the device has fewer
    pub fn pipe(&self, index: usize) -> VerifyResult<PipeHandle> {
        if index < self.model.pipes.len() {
            Ok(PipeHandle(index))
        } else {
            Err(VerifyError::unsupported(format!(
                "pipe {} requested, device has {}",
                index,
                self.model.pipes.len()
            )))
        }
    }

    /// Allocate a linear buffer and track it for release
    pub fn alloc_buffer(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> VerifyResult<Buffer> {
        let buffer = self.device.alloc_buffer(width, height, format, MOD_LINEAR)?;
        self.buffers.insert(buffer.fb_id, buffer);
        Ok(buffer)
    }

    /// Release a buffer allocated through [`KmsContext::alloc_buffer`]
    pub fn free_buffer(&mut self, fb: FbId) -> VerifyResult<()> {
        self.buffers.remove(&fb);
        self.device.free_buffer(fb)?;
        Ok(())
    }

    /// Buffer by framebuffer id
    pub fn buffer(&self, fb: FbId) -> Option<&Buffer> {
        self.buffers.get(&fb)
    }

    /// Wrap a raw descriptor so it is closed on drop
    pub fn guard(&self, fd: i32) -> FdGuard {
        FdGuard::new(fd, self.shared_device())
    }

    /// New fence timeline
    pub fn create_timeline(&self) -> VerifyResult<FdGuard> {
        Ok(self.guard(self.device.create_timeline()?))
    }

    /// Fence that signals once `timeline` reaches `seq`
    pub fn create_fence(&self, timeline: &FdGuard, seq: u32) -> VerifyResult<FdGuard> {
        Ok(self.guard(self.device.create_fence(timeline.fd(), seq)?))
    }

    /// Flip events collected since the last call
    pub fn take_events(&mut self) -> Vec<FlipEvent> {
        std::mem::take(&mut self.events)
    }
}

impl KmsContext<SimDevice> {
    /// Context over a fresh reference device built from `config.device`
    pub fn with_reference_device(config: ProbeConfig) -> VerifyResult<Self> {
        config.validate()?;
        let device = SimDevice::new(config.device_config())?;
        Self::new(Arc::new(device), config)
    }
}

impl<P: Platform + 'static> Drop for KmsContext<P> {
    fn drop(&mut self) {
        for blob in self.model.drain_owned_blobs() {
            self.release_blob(blob);
        }
        for fb in std::mem::take(&mut self.buffers).into_keys() {
            if let Err(e) = self.device.free_buffer(fb) {
                debug!(target: "kmsprobe::scenario", fb = %fb, error = %e, "buffer release failed");
            }
        }
    }
}
