//! In-process reference display device
//!
//! `SimDevice` implements every collaborator trait against a software model
//! of a small display controller: a configurable number of pipelines, each
//! with a primary surface, overlays, an optional cursor and one output.
//! It enforces the same argument, referential and resource rules a kernel
//! driver does and composes real pixels so output checksums are meaningful.
//!
//! Two locks guard the model. The state lock serializes transactions; the
//! fence lock guards descriptors and timelines. When both are held the state
//! lock is taken first. Signaling a timeline only needs the fence lock, so a
//! commit blocked on an input fence can be released from another thread.

mod atomic;
mod check;
mod compose;
mod fence;
mod legacy;
mod state;

use crate::config::SimConfig;
use crate::memory::UserMemory;
use crate::traits::{
    Buffer, BufferProvider, ChecksumSource, ConnectorInfo, DisplayDevice, FenceProvider,
    FlipEvent, LegacyCrtc, LegacyPlane, PlaneConfig, Resources,
};
use fence::FenceTable;
use kmsprobe_core::{
    AtomicRequest, Argb, BlobId, ConnectorId, CrtcId, DamageRect, FbId, KmsError, KmsResult,
    ModeInfo, ObjectId, ObjectKind, PixelFormat, PlaneId, PropertyId, PropertyInfo, MOD_LINEAR,
};
use parking_lot::{Condvar, Mutex};
use state::SimState;
use tracing::{debug, info};

/// Software display controller
#[derive(Debug)]
pub struct SimDevice {
    config: SimConfig,
    state: Mutex<SimState>,
    fences: Mutex<FenceTable>,
    fence_cond: Condvar,
    memory: UserMemory,
}

impl SimDevice {
    /// Build a device with the given topology
    pub fn new(config: SimConfig) -> KmsResult<Self> {
        config.validate()?;
        let state = SimState::new(&config);
        info!(
            target: "kmsprobe::device",
            pipes = config.pipes,
            overlays = config.overlays_per_pipe,
            cursor = config.cursor,
            width = config.width,
            height = config.height,
            "reference device created"
        );
        Ok(SimDevice {
            config,
            state: Mutex::new(state),
            fences: Mutex::new(FenceTable::default()),
            fence_cond: Condvar::new(),
            memory: UserMemory::new(),
        })
    }

    /// Topology the device was built with
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Descriptors currently open (timelines and sync files)
    pub fn open_fd_count(&self) -> usize {
        self.fences.lock().open_count()
    }

    /// Blobs currently alive, user-owned or referenced by committed state
    pub fn blob_count(&self) -> usize {
        self.state.lock().blobs.len()
    }
}

impl DisplayDevice for SimDevice {
    fn get_resources(&self) -> KmsResult<Resources> {
        let state = self.state.lock();
        Ok(Resources {
            crtcs: state.crtcs.iter().map(|c| c.id).collect(),
            connectors: state.connectors.iter().map(|c| c.id).collect(),
            planes: state.planes.iter().map(|p| p.id).collect(),
            framebuffers: state
                .fbs
                .iter()
                .filter(|(_, fb)| !fb.internal)
                .map(|(id, _)| *id)
                .collect(),
        })
    }

    fn get_connector(&self, id: ConnectorId) -> KmsResult<ConnectorInfo> {
        let state = self.state.lock();
        let desc = state.connector_desc(id)?;
        Ok(ConnectorInfo {
            id,
            connected: true,
            modes: vec![desc.mode],
            possible_crtcs: desc.possible_crtcs,
        })
    }

    fn get_object_properties(
        &self,
        id: ObjectId,
        kind: ObjectKind,
    ) -> KmsResult<Vec<(PropertyId, u64)>> {
        self.state.lock().read_properties(id, kind)
    }

    fn get_property(&self, id: PropertyId) -> KmsResult<PropertyInfo> {
        self.state
            .lock()
            .props
            .infos
            .get(&id)
            .cloned()
            .ok_or(KmsError::NoEntry)
    }

    fn create_blob(&self, data: &[u8]) -> KmsResult<BlobId> {
        self.state.lock().create_blob(data, true)
    }

    fn get_blob(&self, id: BlobId) -> KmsResult<Vec<u8>> {
        self.state
            .lock()
            .blobs
            .get(&id)
            .map(|b| b.data.clone())
            .ok_or(KmsError::NoEntry)
    }

    fn destroy_blob(&self, id: BlobId) -> KmsResult<()> {
        self.state.lock().destroy_blob(id)
    }

    fn atomic_commit(&self, request: &AtomicRequest) -> KmsResult<()> {
        let result = self.commit_atomic(request);
        if let Err(e) = &result {
            debug!(
                target: "kmsprobe::device",
                flags = request.flags,
                error = %e,
                "commit rejected"
            );
        }
        result
    }

    fn get_crtc(&self, id: CrtcId) -> KmsResult<LegacyCrtc> {
        self.state.lock().get_crtc(id)
    }

    fn set_crtc(
        &self,
        id: CrtcId,
        fb: FbId,
        x: u32,
        y: u32,
        connectors: &[ConnectorId],
        mode: Option<&ModeInfo>,
    ) -> KmsResult<()> {
        self.state.lock().set_crtc(id, fb, x, y, connectors, mode)
    }

    fn get_plane(&self, id: PlaneId) -> KmsResult<LegacyPlane> {
        self.state.lock().get_plane(id)
    }

    fn set_plane(&self, id: PlaneId, config: &PlaneConfig) -> KmsResult<()> {
        self.state.lock().set_plane(id, config)
    }

    fn set_cursor(&self, crtc: CrtcId, handle: u32, width: u32, height: u32) -> KmsResult<()> {
        self.state.lock().set_cursor(crtc, handle, width, height)
    }

    fn move_cursor(&self, crtc: CrtcId, x: i32, y: i32) -> KmsResult<()> {
        self.state.lock().move_cursor(crtc, x, y)
    }

    fn cursor_size_cap(&self) -> (u32, u32) {
        (self.config.cursor_max, self.config.cursor_max)
    }

    fn read_events(&self) -> Vec<FlipEvent> {
        self.state.lock().events.drain(..).collect()
    }

    fn close_fd(&self, fd: i32) -> KmsResult<()> {
        let result = self.fences.lock().close(fd);
        self.fence_cond.notify_all();
        result
    }

    fn memory(&self) -> &UserMemory {
        &self.memory
    }
}

impl BufferProvider for SimDevice {
    fn alloc_buffer(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        modifier: u64,
    ) -> KmsResult<Buffer> {
        if modifier != MOD_LINEAR {
            return Err(KmsError::InvalidArgument);
        }
        self.state.lock().alloc_buffer(width, height, format)
    }

    fn free_buffer(&self, fb: FbId) -> KmsResult<()> {
        self.state.lock().remove_fb(fb)
    }

    fn fill_rect(&self, fb: FbId, rect: DamageRect, color: Argb) -> KmsResult<()> {
        self.state.lock().fill_rect(fb, rect, color)
    }

    fn paint_pattern(&self, fb: FbId) -> KmsResult<()> {
        self.state.lock().paint_pattern(fb)
    }

    fn copy_buffer(&self, src: FbId, dst: FbId) -> KmsResult<()> {
        self.state.lock().copy_buffer(src, dst)
    }
}

impl FenceProvider for SimDevice {
    fn create_timeline(&self) -> KmsResult<i32> {
        Ok(self.fences.lock().create_timeline())
    }

    fn create_fence(&self, timeline: i32, seq: u32) -> KmsResult<i32> {
        self.fences.lock().create_fence(timeline, seq)
    }

    fn signal(&self, timeline: i32, inc: u32) -> KmsResult<()> {
        self.fences.lock().signal(timeline, inc)?;
        self.fence_cond.notify_all();
        Ok(())
    }

    fn fence_status(&self, fence: i32) -> KmsResult<bool> {
        self.fences.lock().fence_status(fence)
    }
}

impl ChecksumSource for SimDevice {
    fn read_output_checksum(&self, crtc: CrtcId) -> KmsResult<u32> {
        self.state.lock().output_checksum(crtc)
    }
}
