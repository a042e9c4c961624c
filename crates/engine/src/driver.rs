//! Transaction driver
//!
//! Turns the staged state into device calls in one of three styles:
//!
//! - **Atomic**: one request carrying every writable, present property of
//!   every touched object.
//! - **Legacy**: touched pipeline/primary pairs become "set CRTC", overlays
//!   "set plane", cursors "set cursor" followed by "move cursor".
//! - **Universal**: every touched surface goes through "set plane"; pipeline
//!   state is neither submitted nor cleared.
//!
//! Only a successful, non-test submission clears change tracking and the
//! per-commit slots. Rejected and test-only submissions leave everything
//! staged so the same state can be submitted again.

use crate::context::KmsContext;
use crate::model::PlaneHandle;
use crate::payload::RequestArrays;
use kmsprobe_core::{
    as_signed, AtomicFlags, BlobId, ConnectorProperty, CrtcId, CrtcProperty, FbId, KmsError,
    KmsResult, ModeInfo, PlaneProperty, PlaneType, PropertyId, PropertyKind, RelaxPolicy,
};
use kmsprobe_device::{DisplayDevice, FdGuard, Platform, PlaneConfig};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// How a staged state is submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStyle {
    /// One atomic request with these flags
    Atomic(AtomicFlags),
    /// Legacy per-object calls
    Legacy,
    /// "set plane" for every touched surface
    Universal,
}

impl CommitStyle {
    /// Atomic with `ALLOW_MODESET`
    pub fn atomic() -> Self {
        CommitStyle::Atomic(AtomicFlags::ALLOW_MODESET)
    }

    /// Atomic `TEST_ONLY | ALLOW_MODESET`
    pub fn test_only() -> Self {
        CommitStyle::Atomic(AtomicFlags::TEST_ONLY | AtomicFlags::ALLOW_MODESET)
    }

    /// Whether a successful submission leaves the display untouched
    pub fn is_test_only(self) -> bool {
        matches!(self, CommitStyle::Atomic(f) if f.contains(AtomicFlags::TEST_ONLY))
    }

    /// Fields the device is allowed to re-issue under this style
    pub fn relaxation(self) -> RelaxPolicy {
        match self {
            CommitStyle::Legacy => RelaxPolicy::MODE | RelaxPolicy::FB,
            CommitStyle::Atomic(_) | CommitStyle::Universal => RelaxPolicy::NONE,
        }
    }
}

impl fmt::Display for CommitStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitStyle::Atomic(flags) => write!(f, "atomic({:#x})", flags.bits()),
            CommitStyle::Legacy => f.write_str("legacy"),
            CommitStyle::Universal => f.write_str("universal"),
        }
    }
}

impl<P: Platform + 'static> KmsContext<P> {
    /// Submit the staged state
    pub fn try_commit(&mut self, style: CommitStyle) -> KmsResult<()> {
        debug!(
            target: "kmsprobe::commit",
            %style,
            objects = self.model.touched_count(),
            "submitting"
        );
        let result = match style {
            CommitStyle::Atomic(flags) => self.commit_atomic(flags),
            CommitStyle::Legacy => self.commit_legacy(),
            CommitStyle::Universal => self.commit_universal(),
        };
        if let Err(e) = &result {
            debug!(target: "kmsprobe::commit", %style, errno = e.code(), "submission rejected");
        }
        result
    }

    /// Submit the staged state as one atomic request
    pub fn try_commit_atomic(&mut self, flags: AtomicFlags) -> KmsResult<()> {
        self.try_commit(CommitStyle::Atomic(flags))
    }

    fn commit_atomic(&mut self, flags: AtomicFlags) -> KmsResult<()> {
        let mut objs = Vec::new();
        let mut counts = Vec::new();
        let mut props = Vec::new();
        let mut values = Vec::new();
        let mut push = |id: u32, submission: Vec<(PropertyId, u64)>| {
            objs.push(id);
            counts.push(submission.len() as u32);
            for (prop, value) in submission {
                props.push(prop.0);
                values.push(value);
            }
        };
        for plane in self.model.planes.iter().filter(|p| p.state.is_touched()) {
            push(plane.state.id().0, plane.state.submission());
        }
        for pipe in self.model.pipes.iter().filter(|p| p.state.is_touched()) {
            push(pipe.state.id().0, pipe.state.submission());
        }
        for output in self.model.outputs.iter().filter(|o| o.state.is_touched()) {
            push(output.state.id().0, output.state.submission());
        }

        let arrays = RequestArrays::new(self.device.memory(), &objs, &counts, &props, &values)?;
        let result = self.device.atomic_commit(&arrays.request(flags, 0));
        drop(arrays);

        if result.is_ok() && !flags.contains(AtomicFlags::TEST_ONLY) {
            self.collect_out_fences();
            self.finish_commit();
            if flags.contains(AtomicFlags::PAGE_FLIP_EVENT) {
                self.events.extend(self.device.read_events());
            }
        }
        result
    }

    fn collect_out_fences(&mut self) {
        let shared: Arc<dyn DisplayDevice> = self.device.clone();
        let mem = self.device.memory();
        for pipe in &mut self.model.pipes {
            let Some(slot) = pipe.out_slot.take() else {
                continue;
            };
            match mem.read_i32(slot.addr()) {
                Ok(fd) if fd >= 0 => pipe.out_fence = Some(FdGuard::new(fd, shared.clone())),
                Ok(_) => {}
                Err(e) => {
                    debug!(target: "kmsprobe::commit", error = %e, "out-fence slot unreadable");
                }
            }
        }
    }

    /// Clear change tracking on the objects a successful commit consumed
    fn finish_commit(&mut self) {
        let mut released = Vec::new();
        for pipe in &mut self.model.pipes {
            released.extend(pipe.state.committed());
        }
        for output in &mut self.model.outputs {
            released.extend(output.state.committed());
        }
        for plane in &mut self.model.planes {
            released.extend(plane.state.committed());
            plane.in_fence = None;
        }
        for blob in released {
            self.release_blob(blob);
        }
    }

    fn commit_legacy(&mut self) -> KmsResult<()> {
        let mut handled = Vec::new();
        for index in 0..self.model.pipes.len() {
            let pipe = &self.model.pipes[index];
            let primary = &self.model.planes[pipe.primary().0];
            let output_touched = pipe
                .output()
                .map_or(false, |o| self.model.outputs[o.0].state.is_touched());
            if !(pipe.state.is_touched() || primary.state.is_touched() || output_touched) {
                continue;
            }
            let crtc = pipe.id();
            let mode_id = BlobId(pipe.state.value(CrtcProperty::ModeId) as u32);
            if mode_id.is_none() {
                self.device.set_crtc(crtc, FbId::NONE, 0, 0, &[], None)?;
            } else {
                let mode = ModeInfo::from_bytes(&self.device.get_blob(mode_id)?)?;
                let connectors: Vec<_> = self
                    .model
                    .outputs
                    .iter()
                    .filter(|o| o.state.value(ConnectorProperty::CrtcId) == crtc.value())
                    .map(|o| o.id())
                    .collect();
                let fb = FbId(primary.state.value(PlaneProperty::FbId) as u32);
                let x = (primary.state.value(PlaneProperty::SrcX) >> 16) as u32;
                let y = (primary.state.value(PlaneProperty::SrcY) >> 16) as u32;
                self.device.set_crtc(crtc, fb, x, y, &connectors, Some(&mode))?;
            }
            handled.push(pipe.primary());
            let pipe = &mut self.model.pipes[index];
            let output = pipe.output();
            let released = pipe.state.committed();
            if let Some(o) = output {
                self.model.outputs[o.0].state.committed();
            }
            for blob in released {
                self.release_blob(blob);
            }
        }
        for handle in handled {
            self.plane_committed(handle);
        }

        for handle in self.model.plane_handles().collect::<Vec<_>>() {
            let plane = self.model.plane(handle);
            if !plane.state.is_touched() {
                continue;
            }
            match plane.plane_type() {
                PlaneType::Cursor => self.legacy_cursor(handle)?,
                PlaneType::Primary | PlaneType::Overlay => {
                    self.device.set_plane(plane.id(), &self.plane_config(handle))?
                }
            }
            self.plane_committed(handle);
        }
        Ok(())
    }

    fn legacy_cursor(&self, handle: PlaneHandle) -> KmsResult<()> {
        let plane = self.model.plane(handle);
        let crtc = match CrtcId(plane.state.value(PlaneProperty::CrtcId) as u32) {
            id if id.is_none() => plane
                .pipe()
                .map(|p| self.model.pipe(p).id())
                .ok_or(KmsError::NoEntry)?,
            id => id,
        };
        let fb = FbId(plane.state.value(PlaneProperty::FbId) as u32);
        if fb.is_none() {
            return self.device.set_cursor(crtc, 0, 0, 0);
        }
        let buffer = self.buffers.get(&fb).ok_or(KmsError::NoEntry)?;
        let width = plane.state.value(PlaneProperty::CrtcW) as u32;
        let height = plane.state.value(PlaneProperty::CrtcH) as u32;
        self.device.set_cursor(crtc, buffer.handle, width, height)?;
        self.device.move_cursor(
            crtc,
            as_signed(plane.state.value(PlaneProperty::CrtcX)) as i32,
            as_signed(plane.state.value(PlaneProperty::CrtcY)) as i32,
        )
    }

    fn plane_config(&self, handle: PlaneHandle) -> PlaneConfig {
        let state = &self.model.plane(handle).state;
        let v = |p: PlaneProperty| state.value(p);
        PlaneConfig {
            crtc_id: CrtcId(v(PlaneProperty::CrtcId) as u32),
            fb_id: FbId(v(PlaneProperty::FbId) as u32),
            crtc_x: as_signed(v(PlaneProperty::CrtcX)) as i32,
            crtc_y: as_signed(v(PlaneProperty::CrtcY)) as i32,
            crtc_w: v(PlaneProperty::CrtcW) as u32,
            crtc_h: v(PlaneProperty::CrtcH) as u32,
            src_x: v(PlaneProperty::SrcX) as u32,
            src_y: v(PlaneProperty::SrcY) as u32,
            src_w: v(PlaneProperty::SrcW) as u32,
            src_h: v(PlaneProperty::SrcH) as u32,
        }
    }

    fn plane_committed(&mut self, handle: PlaneHandle) {
        let plane = &mut self.model.planes[handle.0];
        plane.in_fence = None;
        for blob in plane.state.committed() {
            self.release_blob(blob);
        }
    }

    fn commit_universal(&mut self) -> KmsResult<()> {
        for handle in self.model.plane_handles().collect::<Vec<_>>() {
            let plane = self.model.plane(handle);
            if !plane.state.is_touched() {
                continue;
            }
            self.device.set_plane(plane.id(), &self.plane_config(handle))?;
            self.plane_committed(handle);
        }
        Ok(())
    }
}

/// Whether any checked property of `P` is relaxed under `relax`
pub fn relaxes<P: PropertyKind>(prop: P, relax: RelaxPolicy) -> bool {
    let r = prop.relaxation();
    !r.is_empty() && relax.contains(r)
}
