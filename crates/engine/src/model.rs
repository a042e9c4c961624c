//! Property model
//!
//! The engine keeps a staged copy of every property of every pipeline,
//! surface and output it discovered. Staging only touches this copy; the
//! device sees it when a transaction is submitted. Each object also keeps a
//! change mask so the driver knows which objects a transaction touches.
//!
//! Objects are addressed by handles ([`PipeHandle`], [`PlaneHandle`],
//! [`OutputHandle`]) handed out at discovery. The [`Target`] trait ties a
//! handle to its property enum, so `ctx.stage(plane, PlaneProperty::FbId, v)`
//! is checked at compile time.

use crate::context::KmsContext;
use crate::error::{VerifyError, VerifyResult};
use kmsprobe_core::{
    encode_rects, signed_value, BlobId, ConnectorId, ConnectorProperty, CrtcId, CrtcProperty,
    DamageRect, FbId, ModeInfo, ObjectId, PixelFormat, PlaneId, PlaneProperty, PlaneType,
    PropertyId, PropertyKind, PropertyMask, PropertyVector, NO_FENCE,
};
use kmsprobe_device::{Buffer, DisplayDevice, FdGuard, Mapping, Platform, Protection};
use smallvec::{smallvec, SmallVec};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

// ============================================================================
// Handles
// ============================================================================

macro_rules! handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) usize);

        impl $name {
            /// Position in discovery order
            pub fn index(self) -> usize {
                self.0
            }
        }
    };
}

handle!(
    /// Pipeline (CRTC) handle
    PipeHandle
);
handle!(
    /// Surface (plane) handle
    PlaneHandle
);
handle!(
    /// Output (connector) handle
    OutputHandle
);

// ============================================================================
// Per-object staged state
// ============================================================================

/// Staged property values of one object
#[derive(Clone)]
pub struct ObjectState<P: PropertyKind> {
    id: ObjectId,
    prop_ids: SmallVec<[Option<PropertyId>; 16]>,
    immutable: PropertyMask,
    staged: PropertyVector<P>,
    changed: PropertyMask,
    owned_blobs: BTreeMap<usize, BlobId>,
}

impl<P: PropertyKind> ObjectState<P> {
    /// Read an object's properties and seed the staged vector with them
    pub(crate) fn discover(dev: &dyn DisplayDevice, id: ObjectId) -> VerifyResult<Self> {
        let mut state = ObjectState {
            id,
            prop_ids: smallvec![None; P::ALL.len()],
            immutable: PropertyMask::EMPTY,
            staged: PropertyVector::new(),
            changed: PropertyMask::EMPTY,
            owned_blobs: BTreeMap::new(),
        };
        for (pid, value) in dev.get_object_properties(id, P::CLASS)? {
            let info = dev.get_property(pid)?;
            let Some(prop) = P::from_name(&info.name) else {
                continue;
            };
            state.prop_ids[prop.index()] = Some(pid);
            if info.is_immutable() {
                state.immutable.insert(prop.index());
            }
            state.staged.set(prop, prop.reset_after_commit().unwrap_or(value));
        }
        Ok(state)
    }

    /// Object id
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Whether the object exposes this property
    pub fn has(&self, prop: P) -> bool {
        self.prop_ids[prop.index()].is_some()
    }

    /// Whether the property was discovered as immutable
    pub fn is_immutable(&self, prop: P) -> bool {
        self.immutable.contains(prop.index())
    }

    /// Device id of a property, `None` when absent
    pub fn property_id(&self, prop: P) -> Option<PropertyId> {
        self.prop_ids[prop.index()]
    }

    /// Staged value of a property
    pub fn value(&self, prop: P) -> u64 {
        self.staged.get(prop)
    }

    /// Whole staged vector
    pub fn staged(&self) -> &PropertyVector<P> {
        &self.staged
    }

    /// Properties staged since the last successful commit
    pub fn changed(&self) -> PropertyMask {
        self.changed
    }

    /// Something was staged since the last successful commit
    pub fn is_touched(&self) -> bool {
        !self.changed.is_empty()
    }

    /// Mask of properties the object exposes
    pub fn present(&self) -> PropertyMask {
        let mut mask = PropertyMask::EMPTY;
        for &p in P::ALL {
            if self.has(p) {
                mask.insert(p.index());
            }
        }
        mask
    }

    pub(crate) fn set(&mut self, prop: P, value: u64) {
        self.staged.set(prop, value);
        if self.has(prop) && !self.is_immutable(prop) {
            self.changed.insert(prop.index());
        }
    }

    /// `(property id, value)` for every writable, present property
    pub(crate) fn submission(&self) -> Vec<(PropertyId, u64)> {
        P::ALL
            .iter()
            .filter(|p| !self.is_immutable(**p))
            .filter_map(|p| self.property_id(*p).map(|id| (id, self.staged.get(*p))))
            .collect()
    }

    pub(crate) fn replace_owned_blob(&mut self, prop: P, blob: BlobId) -> Option<BlobId> {
        self.owned_blobs.insert(prop.index(), blob)
    }

    pub(crate) fn take_owned_blob(&mut self, prop: P) -> Option<BlobId> {
        self.owned_blobs.remove(&prop.index())
    }

    pub(crate) fn drain_owned_blobs(&mut self) -> Vec<BlobId> {
        std::mem::take(&mut self.owned_blobs).into_values().collect()
    }

    /// Clear change tracking after a successful commit; per-commit slots
    /// return to their idle value and any blob the engine owned for them is
    /// handed back for release
    pub(crate) fn committed(&mut self) -> Vec<BlobId> {
        let mut released = Vec::new();
        for &p in P::ALL {
            if let Some(idle) = p.reset_after_commit() {
                self.staged.set(p, idle);
                if let Some(blob) = self.take_owned_blob(p) {
                    released.push(blob);
                }
            }
        }
        self.changed.clear();
        released
    }
}

impl<P: PropertyKind> fmt::Debug for ObjectState<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectState")
            .field("id", &self.id)
            .field("staged", &self.staged)
            .field("changed", &self.changed)
            .finish()
    }
}

// ============================================================================
// Objects
// ============================================================================

/// Discovered pipeline and the surfaces and output it drives
#[derive(Debug)]
pub struct Pipe {
    pub(crate) state: ObjectState<CrtcProperty>,
    id: CrtcId,
    index: usize,
    primary: PlaneHandle,
    overlays: Vec<PlaneHandle>,
    cursor: Option<PlaneHandle>,
    output: Option<OutputHandle>,
    pub(crate) out_slot: Option<Mapping>,
    pub(crate) out_fence: Option<FdGuard>,
}

impl Pipe {
    /// Pipeline id
    pub fn id(&self) -> CrtcId {
        self.id
    }

    /// Bit position in `possible_crtcs` masks
    pub fn index(&self) -> usize {
        self.index
    }

    /// Primary surface
    pub fn primary(&self) -> PlaneHandle {
        self.primary
    }

    /// Overlay surfaces usable on this pipeline
    pub fn overlays(&self) -> &[PlaneHandle] {
        &self.overlays
    }

    /// Cursor surface, if any
    pub fn cursor(&self) -> Option<PlaneHandle> {
        self.cursor
    }

    /// Output assigned to this pipeline
    pub fn output(&self) -> Option<OutputHandle> {
        self.output
    }

    /// Staged properties
    pub fn state(&self) -> &ObjectState<CrtcProperty> {
        &self.state
    }
}

/// Discovered surface
#[derive(Debug)]
pub struct Plane {
    pub(crate) state: ObjectState<PlaneProperty>,
    id: PlaneId,
    plane_type: PlaneType,
    possible_crtcs: u32,
    formats: Vec<PixelFormat>,
    pipe: Option<PipeHandle>,
    pub(crate) in_fence: Option<FdGuard>,
}

impl Plane {
    /// Surface id
    pub fn id(&self) -> PlaneId {
        self.id
    }

    /// Type tag
    pub fn plane_type(&self) -> PlaneType {
        self.plane_type
    }

    /// Pipelines the surface can be assigned to, as an index bitmask
    pub fn possible_crtcs(&self) -> u32 {
        self.possible_crtcs
    }

    /// Supported pixel formats
    pub fn formats(&self) -> &[PixelFormat] {
        &self.formats
    }

    /// Pipeline this surface was assigned to at discovery
    pub fn pipe(&self) -> Option<PipeHandle> {
        self.pipe
    }

    /// Staged properties
    pub fn state(&self) -> &ObjectState<PlaneProperty> {
        &self.state
    }
}

/// Discovered output
#[derive(Debug)]
pub struct Output {
    pub(crate) state: ObjectState<ConnectorProperty>,
    id: ConnectorId,
    possible_crtcs: u32,
    modes: Vec<ModeInfo>,
}

impl Output {
    /// Output id
    pub fn id(&self) -> ConnectorId {
        self.id
    }

    /// Pipelines the output can be routed to, as an index bitmask
    pub fn possible_crtcs(&self) -> u32 {
        self.possible_crtcs
    }

    /// Preferred mode first
    pub fn modes(&self) -> &[ModeInfo] {
        &self.modes
    }

    /// Staged properties
    pub fn state(&self) -> &ObjectState<ConnectorProperty> {
        &self.state
    }
}

/// Everything discovered on the device, with staged values
#[derive(Debug)]
pub struct DisplayModel {
    pub(crate) pipes: Vec<Pipe>,
    pub(crate) planes: Vec<Plane>,
    pub(crate) outputs: Vec<Output>,
}

impl DisplayModel {
    /// Enumerate the device and read every object's current properties
    pub fn discover(dev: &dyn DisplayDevice) -> VerifyResult<Self> {
        let res = dev.get_resources()?;

        let mut planes = Vec::with_capacity(res.planes.len());
        for id in &res.planes {
            let state = ObjectState::<PlaneProperty>::discover(dev, id.object())?;
            let plane_type = PlaneType::from_value(state.value(PlaneProperty::Type))
                .ok_or_else(|| VerifyError::unsupported(format!("plane {} has no type", id)))?;
            let legacy = dev.get_plane(*id)?;
            planes.push(Plane {
                state,
                id: *id,
                plane_type,
                possible_crtcs: legacy.possible_crtcs,
                formats: legacy.formats,
                pipe: None,
                in_fence: None,
            });
        }

        let mut outputs = Vec::with_capacity(res.connectors.len());
        let mut connected = Vec::with_capacity(res.connectors.len());
        for id in &res.connectors {
            let info = dev.get_connector(*id)?;
            outputs.push(Output {
                state: ObjectState::discover(dev, id.object())?,
                id: *id,
                possible_crtcs: info.possible_crtcs,
                modes: info.modes,
            });
            connected.push(info.connected);
        }

        let mut pipes = Vec::with_capacity(res.crtcs.len());
        let mut output_taken = vec![false; outputs.len()];
        for (index, id) in res.crtcs.iter().enumerate() {
            let bit = 1u32 << index;
            let usable = |p: &Plane, t: PlaneType| p.plane_type == t && p.possible_crtcs & bit != 0;
            let primary = planes
                .iter()
                .position(|p| usable(p, PlaneType::Primary) && p.pipe.is_none())
                .ok_or_else(|| {
                    VerifyError::unsupported(format!("pipe {} has no primary plane", index))
                })?;
            let cursor = planes
                .iter()
                .position(|p| usable(p, PlaneType::Cursor) && p.pipe.is_none());
            let overlays: Vec<usize> = planes
                .iter()
                .enumerate()
                .filter(|(_, p)| usable(p, PlaneType::Overlay))
                .map(|(i, _)| i)
                .collect();
            let output = outputs.iter().enumerate().position(|(i, o)| {
                connected[i] && !output_taken[i] && o.possible_crtcs & bit != 0
            });

            let handle = PipeHandle(index);
            for i in std::iter::once(primary).chain(cursor).chain(overlays.iter().copied()) {
                planes[i].pipe.get_or_insert(handle);
            }
            if let Some(o) = output {
                output_taken[o] = true;
            }
            pipes.push(Pipe {
                state: ObjectState::discover(dev, id.object())?,
                id: *id,
                index,
                primary: PlaneHandle(primary),
                overlays: overlays.into_iter().map(PlaneHandle).collect(),
                cursor: cursor.map(PlaneHandle),
                output: output.map(OutputHandle),
                out_slot: None,
                out_fence: None,
            });
        }

        Ok(DisplayModel {
            pipes,
            planes,
            outputs,
        })
    }

    /// Pipeline by handle
    pub fn pipe(&self, handle: PipeHandle) -> &Pipe {
        &self.pipes[handle.0]
    }

    /// Surface by handle
    pub fn plane(&self, handle: PlaneHandle) -> &Plane {
        &self.planes[handle.0]
    }

    /// Output by handle
    pub fn output(&self, handle: OutputHandle) -> &Output {
        &self.outputs[handle.0]
    }

    /// All pipeline handles
    pub fn pipe_handles(&self) -> impl Iterator<Item = PipeHandle> {
        (0..self.pipes.len()).map(PipeHandle)
    }

    /// All surface handles
    pub fn plane_handles(&self) -> impl Iterator<Item = PlaneHandle> {
        (0..self.planes.len()).map(PlaneHandle)
    }

    /// All output handles
    pub fn output_handles(&self) -> impl Iterator<Item = OutputHandle> {
        (0..self.outputs.len()).map(OutputHandle)
    }

    /// Surfaces that may be placed on a pipeline, ordered by staged zpos
    /// then id; the cursor is left out
    pub fn stackable_planes(&self, pipe: PipeHandle) -> Vec<PlaneHandle> {
        let p = self.pipe(pipe);
        let mut out: Vec<PlaneHandle> = std::iter::once(p.primary)
            .chain(p.overlays.iter().copied())
            .collect();
        out.sort_by_key(|h| {
            let plane = self.plane(*h);
            (plane.state.value(PlaneProperty::Zpos), plane.id)
        });
        out
    }

    pub(crate) fn touched_count(&self) -> usize {
        self.pipes.iter().filter(|p| p.state.is_touched()).count()
            + self.planes.iter().filter(|p| p.state.is_touched()).count()
            + self.outputs.iter().filter(|o| o.state.is_touched()).count()
    }

    pub(crate) fn drain_owned_blobs(&mut self) -> Vec<BlobId> {
        let mut blobs = Vec::new();
        for pipe in &mut self.pipes {
            blobs.extend(pipe.state.drain_owned_blobs());
        }
        for plane in &mut self.planes {
            blobs.extend(plane.state.drain_owned_blobs());
        }
        for output in &mut self.outputs {
            blobs.extend(output.state.drain_owned_blobs());
        }
        blobs
    }
}

// ============================================================================
// Typed access
// ============================================================================

/// A handle whose object carries properties of class `Prop`
pub trait Target: Copy + fmt::Debug {
    /// Property enum of the object class
    type Prop: PropertyKind;

    /// Staged state of the object
    fn state(self, model: &DisplayModel) -> &ObjectState<Self::Prop>;

    /// Mutable staged state of the object
    fn state_mut(self, model: &mut DisplayModel) -> &mut ObjectState<Self::Prop>;
}

impl Target for PipeHandle {
    type Prop = CrtcProperty;

    fn state(self, model: &DisplayModel) -> &ObjectState<CrtcProperty> {
        &model.pipes[self.0].state
    }

    fn state_mut(self, model: &mut DisplayModel) -> &mut ObjectState<CrtcProperty> {
        &mut model.pipes[self.0].state
    }
}

impl Target for PlaneHandle {
    type Prop = PlaneProperty;

    fn state(self, model: &DisplayModel) -> &ObjectState<PlaneProperty> {
        &model.planes[self.0].state
    }

    fn state_mut(self, model: &mut DisplayModel) -> &mut ObjectState<PlaneProperty> {
        &mut model.planes[self.0].state
    }
}

impl Target for OutputHandle {
    type Prop = ConnectorProperty;

    fn state(self, model: &DisplayModel) -> &ObjectState<ConnectorProperty> {
        &model.outputs[self.0].state
    }

    fn state_mut(self, model: &mut DisplayModel) -> &mut ObjectState<ConnectorProperty> {
        &mut model.outputs[self.0].state
    }
}

// ============================================================================
// Property operations on the run context
// ============================================================================

impl<P: Platform + 'static> KmsContext<P> {
    /// Current device value of a property, read through the atomic query path
    pub fn get<T: Target>(&self, target: T, prop: T::Prop) -> VerifyResult<u64> {
        let state = target.state(&self.model);
        let pid = state.property_id(prop).ok_or_else(|| {
            let what = format!("object {} has no {} property", state.id(), prop.name());
            VerifyError::unsupported(what)
        })?;
        self.device
            .get_object_properties(state.id(), T::Prop::CLASS)?
            .into_iter()
            .find(|(id, _)| *id == pid)
            .map(|(_, v)| v)
            .ok_or_else(|| {
                let what = format!("object {} stopped reporting {}", state.id(), prop.name());
                VerifyError::unsupported(what)
            })
    }

    /// Staged value of a property
    pub fn staged<T: Target>(&self, target: T, prop: T::Prop) -> u64 {
        target.state(&self.model).value(prop)
    }

    /// Whether the object exposes a property
    pub fn has<T: Target>(&self, target: T, prop: T::Prop) -> bool {
        target.state(&self.model).has(prop)
    }

    /// Stage a raw value; nothing reaches the device until a commit
    pub fn stage<T: Target>(&mut self, target: T, prop: T::Prop, value: u64) {
        target.state_mut(&mut self.model).set(prop, value);
    }

    /// Register `data` as a blob and stage its id
    ///
    /// The engine owns the blob; a blob it staged earlier for the same slot
    /// is released.
    pub fn stage_blob<T: Target>(
        &mut self,
        target: T,
        prop: T::Prop,
        data: &[u8],
    ) -> VerifyResult<BlobId> {
        let blob = self.device.create_blob(data)?;
        let state = target.state_mut(&mut self.model);
        state.set(prop, blob.value());
        if let Some(old) = state.replace_owned_blob(prop, blob) {
            self.release_blob(old);
        }
        Ok(blob)
    }

    /// Stage 0 in a blob slot, releasing the blob the engine owned there
    pub fn clear_blob<T: Target>(&mut self, target: T, prop: T::Prop) {
        let state = target.state_mut(&mut self.model);
        state.set(prop, 0);
        if let Some(old) = state.take_owned_blob(prop) {
            self.release_blob(old);
        }
    }

    pub(crate) fn release_blob(&self, blob: BlobId) {
        if let Err(e) = self.device.destroy_blob(blob) {
            debug!(target: "kmsprobe::commit", blob = %blob, error = %e, "blob release failed");
        }
    }

    /// Stage a mode, or clear it with `None`
    pub fn stage_mode(&mut self, pipe: PipeHandle, mode: Option<&ModeInfo>) -> VerifyResult<()> {
        match mode {
            Some(mode) => {
                self.stage_blob(pipe, CrtcProperty::ModeId, &mode.to_bytes())?;
            }
            None => self.clear_blob(pipe, CrtcProperty::ModeId),
        }
        Ok(())
    }

    /// Stage damage rectangles for the next commit of a surface
    pub fn stage_damage(&mut self, plane: PlaneHandle, rects: &[DamageRect]) -> VerifyResult<()> {
        if rects.is_empty() {
            self.clear_blob(plane, PlaneProperty::FbDamageClips);
            return Ok(());
        }
        self.stage_blob(plane, PlaneProperty::FbDamageClips, &encode_rects(rects))?;
        Ok(())
    }

    /// Stage an input fence, taking ownership of its descriptor
    ///
    /// The guard is held while the value is staged and closed once a
    /// commit consumed it, or when another fence (or `None`) is staged.
    pub fn stage_in_fence(&mut self, plane: PlaneHandle, fence: Option<FdGuard>) {
        let value = fence
            .as_ref()
            .map_or(NO_FENCE, |g| signed_value(i64::from(g.fd())));
        self.stage(plane, PlaneProperty::InFenceFd, value);
        self.model.planes[plane.0].in_fence = fence;
    }

    /// Ask for an out-fence on the next commit; returns the slot address
    pub fn request_out_fence(&mut self, pipe: PipeHandle) -> VerifyResult<u64> {
        let slot = self
            .device
            .memory()
            .map_guarded(std::mem::size_of::<i32>(), Protection::READ_WRITE)?;
        let addr = slot.addr();
        self.model.pipes[pipe.0].out_slot = Some(slot);
        self.stage(pipe, CrtcProperty::OutFencePtr, addr);
        Ok(addr)
    }

    /// Current content of the out-fence slot requested for a pipeline
    pub fn out_fence_slot(&self, pipe: PipeHandle) -> VerifyResult<Option<i32>> {
        match &self.model.pipes[pipe.0].out_slot {
            Some(slot) => Ok(Some(self.device.memory().read_i32(slot.addr())?)),
            None => Ok(None),
        }
    }

    /// Take the out-fence a successful commit produced
    pub fn take_out_fence(&mut self, pipe: PipeHandle) -> Option<FdGuard> {
        self.model.pipes[pipe.0].out_fence.take()
    }

    /// Drop any requested out-fence slot and stop asking for one
    pub fn clear_out_fence(&mut self, pipe: PipeHandle) {
        self.model.pipes[pipe.0].out_slot = None;
        self.stage(pipe, CrtcProperty::OutFencePtr, 0);
    }

    /// Stage a surface scanning out all of `buffer` at `(x, y)` on `pipe`
    pub fn stage_plane(
        &mut self,
        plane: PlaneHandle,
        pipe: PipeHandle,
        buffer: &Buffer,
        x: i32,
        y: i32,
    ) {
        let crtc = self.model.pipe(pipe).id();
        self.stage_plane_region(
            plane,
            crtc,
            buffer.fb_id,
            DamageRect::from_size(0, 0, buffer.width, buffer.height),
            x,
            y,
        );
    }

    /// Stage a surface scanning out `src` of a framebuffer at `(x, y)`, unscaled
    pub fn stage_plane_region(
        &mut self,
        plane: PlaneHandle,
        crtc: CrtcId,
        fb: FbId,
        src: DamageRect,
        x: i32,
        y: i32,
    ) {
        let values = [
            (PlaneProperty::CrtcId, crtc.value()),
            (PlaneProperty::FbId, fb.value()),
            (PlaneProperty::SrcX, u64::from(src.x1.max(0) as u32) << 16),
            (PlaneProperty::SrcY, u64::from(src.y1.max(0) as u32) << 16),
            (PlaneProperty::SrcW, u64::from(src.width()) << 16),
            (PlaneProperty::SrcH, u64::from(src.height()) << 16),
            (PlaneProperty::CrtcX, signed_value(i64::from(x))),
            (PlaneProperty::CrtcY, signed_value(i64::from(y))),
            (PlaneProperty::CrtcW, u64::from(src.width())),
            (PlaneProperty::CrtcH, u64::from(src.height())),
        ];
        for (prop, value) in values {
            self.stage(plane, prop, value);
        }
    }

    /// Stage a surface as detached
    pub fn stage_plane_disabled(&mut self, plane: PlaneHandle) {
        let props = [
            PlaneProperty::CrtcId,
            PlaneProperty::FbId,
            PlaneProperty::SrcX,
            PlaneProperty::SrcY,
            PlaneProperty::SrcW,
            PlaneProperty::SrcH,
            PlaneProperty::CrtcX,
            PlaneProperty::CrtcY,
            PlaneProperty::CrtcW,
            PlaneProperty::CrtcH,
        ];
        for prop in props {
            self.stage(plane, prop, 0);
        }
    }

    /// Stage a pipeline as lit with `mode`, its output routed to it
    pub fn stage_pipe_enabled(&mut self, pipe: PipeHandle, mode: &ModeInfo) -> VerifyResult<()> {
        let p = self.model.pipe(pipe);
        let (crtc, output) = (p.id(), p.output());
        let output = output
            .ok_or_else(|| VerifyError::unsupported(format!("pipe {} has no output", pipe.0)))?;
        self.stage_mode(pipe, Some(mode))?;
        self.stage(pipe, CrtcProperty::Active, 1);
        self.stage(output, ConnectorProperty::CrtcId, crtc.value());
        Ok(())
    }

    /// Stage a pipeline as off, its output unrouted
    pub fn stage_pipe_disabled(&mut self, pipe: PipeHandle) -> VerifyResult<()> {
        self.stage_mode(pipe, None)?;
        self.stage(pipe, CrtcProperty::Active, 0);
        if let Some(output) = self.model.pipe(pipe).output() {
            self.stage(output, ConnectorProperty::CrtcId, 0);
        }
        Ok(())
    }

    /// Preferred mode of the pipeline's output
    pub fn preferred_mode(&self, pipe: PipeHandle) -> VerifyResult<ModeInfo> {
        self.model
            .pipe(pipe)
            .output()
            .and_then(|o| self.model.output(o).modes().first().copied())
            .ok_or_else(|| VerifyError::unsupported(format!("pipe {} has no output mode", pipe.0)))
    }
}
