//! Legacy query adapter
//!
//! Converts the staged atomic values into the shape the legacy "get CRTC"
//! and "get plane" calls report, and compares the two. Only the fields the
//! legacy calls can express are checked: a pipeline's mode and whether it
//! has one, the scanout buffer and position of its primary surface, and a
//! surface's pipeline and buffer. Positions are source-crop values shifted
//! right by 16.

use crate::context::KmsContext;
use crate::error::{QueryPath, VerifyError, VerifyResult};
use crate::model::{PipeHandle, PlaneHandle};
use kmsprobe_core::{
    BlobId, CrtcId, CrtcProperty, FbId, ModeInfo, ObjectId, PlaneProperty, RelaxPolicy,
};
use kmsprobe_device::Platform;
use std::fmt::Debug;

/// What "get CRTC" reports, reduced to the checked fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyPipeView {
    /// Mode, `None` when `mode_valid` is false
    pub mode: Option<ModeInfo>,
    /// Primary surface's framebuffer
    pub buffer_id: FbId,
    /// Primary source crop x in pixels
    pub x: u32,
    /// Primary source crop y in pixels
    pub y: u32,
}

/// What "get plane" reports, reduced to the checked fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyPlaneView {
    /// Assigned pipeline
    pub crtc_id: CrtcId,
    /// Attached framebuffer
    pub fb_id: FbId,
}

fn mismatch<T: Debug>(
    object: ObjectId,
    property: &'static str,
    expected: T,
    actual: T,
) -> VerifyError {
    VerifyError::Mismatch {
        path: QueryPath::Legacy,
        object,
        property,
        expected: format!("{:?}", expected),
        actual: format!("{:?}", actual),
    }
}

impl LegacyPipeView {
    /// Compare against `expected`
    ///
    /// The primary's buffer is always compared exactly; relaxation only
    /// applies to a surface's own view.
    pub fn check_against(&self, expected: &Self, object: ObjectId) -> VerifyResult<()> {
        if self.mode.is_some() != expected.mode.is_some() {
            return Err(mismatch(
                object,
                "mode_valid",
                expected.mode.is_some(),
                self.mode.is_some(),
            ));
        }
        if self.mode != expected.mode {
            return Err(mismatch(object, "mode", expected.mode, self.mode));
        }
        if self.buffer_id != expected.buffer_id {
            return Err(mismatch(object, "buffer_id", expected.buffer_id, self.buffer_id));
        }
        if (self.x, self.y) != (expected.x, expected.y) {
            return Err(mismatch(object, "x/y", (expected.x, expected.y), (self.x, self.y)));
        }
        Ok(())
    }
}

impl LegacyPlaneView {
    /// Compare against `expected`, excusing a re-issued buffer under `FB`
    pub fn check_against(
        &self,
        expected: &Self,
        object: ObjectId,
        relax: RelaxPolicy,
    ) -> VerifyResult<()> {
        if self.crtc_id != expected.crtc_id {
            return Err(mismatch(object, "crtc_id", expected.crtc_id, self.crtc_id));
        }
        let fb_equal = if relax.contains(RelaxPolicy::FB) {
            self.fb_id.is_none() == expected.fb_id.is_none()
        } else {
            self.fb_id == expected.fb_id
        };
        if !fb_equal {
            return Err(mismatch(object, "fb_id", expected.fb_id, self.fb_id));
        }
        Ok(())
    }
}

impl<P: Platform + 'static> KmsContext<P> {
    /// Read a pipeline through "get CRTC"
    ///
    /// Fails when the reported size disagrees with a valid mode.
    pub fn legacy_pipe(&self, pipe: PipeHandle) -> VerifyResult<LegacyPipeView> {
        let id = self.model.pipe(pipe).id();
        let crtc = self.device.get_crtc(id)?;
        if crtc.mode_valid {
            let expected = (u32::from(crtc.mode.hdisplay), u32::from(crtc.mode.vdisplay));
            if (crtc.width, crtc.height) != expected {
                let actual = (crtc.width, crtc.height);
                return Err(mismatch(id.object(), "width/height", expected, actual));
            }
        }
        Ok(LegacyPipeView {
            mode: crtc.mode_valid.then_some(crtc.mode),
            buffer_id: crtc.buffer_id,
            x: crtc.x,
            y: crtc.y,
        })
    }

    /// Read a surface through "get plane"
    pub fn legacy_plane(&self, plane: PlaneHandle) -> VerifyResult<LegacyPlaneView> {
        let got = self.device.get_plane(self.model.plane(plane).id())?;
        Ok(LegacyPlaneView {
            crtc_id: got.crtc_id,
            fb_id: got.fb_id,
        })
    }

    /// Legacy shape of a pipeline's staged state
    pub fn expected_legacy_pipe(&self, pipe: PipeHandle) -> VerifyResult<LegacyPipeView> {
        let p = self.model.pipe(pipe);
        let mode_id = BlobId(p.state.value(CrtcProperty::ModeId) as u32);
        let mode = if mode_id.is_none() {
            None
        } else {
            Some(ModeInfo::from_bytes(&self.device.get_blob(mode_id)?)?)
        };
        let primary = &self.model.plane(p.primary()).state;
        let scanning = primary.value(PlaneProperty::CrtcId) == p.id().value();
        let (buffer_id, x, y) = if scanning {
            (
                FbId(primary.value(PlaneProperty::FbId) as u32),
                (primary.value(PlaneProperty::SrcX) >> 16) as u32,
                (primary.value(PlaneProperty::SrcY) >> 16) as u32,
            )
        } else {
            (FbId::NONE, 0, 0)
        };
        Ok(LegacyPipeView {
            mode,
            buffer_id,
            x,
            y,
        })
    }

    /// Legacy shape of a surface's staged state
    pub fn expected_legacy_plane(&self, plane: PlaneHandle) -> LegacyPlaneView {
        let state = &self.model.plane(plane).state;
        LegacyPlaneView {
            crtc_id: CrtcId(state.value(PlaneProperty::CrtcId) as u32),
            fb_id: FbId(state.value(PlaneProperty::FbId) as u32),
        }
    }

    /// Legacy view of a pipeline agrees with its staged state
    pub fn verify_legacy_pipe(&self, pipe: PipeHandle) -> VerifyResult<()> {
        let actual = self.legacy_pipe(pipe)?;
        let expected = self.expected_legacy_pipe(pipe)?;
        actual.check_against(&expected, self.model.pipe(pipe).id().object())
    }

    /// Legacy view of a surface agrees with its staged state
    pub fn verify_legacy_plane(&self, plane: PlaneHandle, relax: RelaxPolicy) -> VerifyResult<()> {
        let actual = self.legacy_plane(plane)?;
        let expected = self.expected_legacy_plane(plane);
        actual.check_against(&expected, self.model.plane(plane).id().object(), relax)
    }
}
