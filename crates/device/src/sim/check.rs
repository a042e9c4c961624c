//! Whole-state validation
//!
//! Every transaction, atomic or legacy, ends in [`SimState::check_state`]
//! against the candidate state before anything is committed.

use super::state::{DisplayState, PlaneState, SimState};
use kmsprobe_core::{CrtcId, KmsError, KmsResult, PlaneId, PlaneType};
use std::collections::BTreeSet;

impl SimState {
    /// Validate `new` as a successor of `old`
    pub fn check_state(
        &self,
        old: &DisplayState,
        new: &DisplayState,
        allow_modeset: bool,
    ) -> KmsResult<()> {
        for (id, plane) in &new.planes {
            self.check_plane(new, *id, plane)?;
        }
        for (id, crtc) in &new.crtcs {
            let routed = new.routed_to(*id);
            if crtc.active && crtc.mode.is_none() {
                return Err(KmsError::InvalidArgument);
            }
            if !crtc.mode.is_none() && routed.is_empty() {
                return Err(KmsError::InvalidArgument);
            }
            if !allow_modeset && self.needs_modeset(old, new, *id)? {
                return Err(KmsError::InvalidArgument);
            }
        }
        for (id, crtc) in &new.connectors {
            if crtc.is_none() {
                continue;
            }
            let desc = self.connector_desc(*id)?;
            let pipe = self.crtc_desc(*crtc)?;
            if desc.possible_crtcs & (1 << pipe.index) == 0 {
                return Err(KmsError::InvalidArgument);
            }
            if new.crtc(*crtc)?.mode.is_none() {
                return Err(KmsError::InvalidArgument);
            }
        }
        Ok(())
    }

    fn check_plane(&self, state: &DisplayState, id: PlaneId, plane: &PlaneState) -> KmsResult<()> {
        if plane.crtc.is_none() != plane.fb.is_none() {
            return Err(KmsError::InvalidArgument);
        }
        if plane.fb.is_none() {
            return Ok(());
        }
        let desc = self.plane_desc(id)?;
        let pipe = self.crtc_desc(plane.crtc)?;
        if desc.possible_crtcs & (1 << pipe.index) == 0 {
            return Err(KmsError::InvalidArgument);
        }
        let fb = self.fbs.get(&plane.fb).ok_or(KmsError::InvalidArgument)?;
        if !desc.formats.contains(&fb.format) {
            return Err(KmsError::InvalidArgument);
        }
        if state.crtc(plane.crtc)?.mode.is_none() {
            return Err(KmsError::InvalidArgument);
        }

        let src_right = u64::from(plane.src_x) + u64::from(plane.src_w);
        let src_bottom = u64::from(plane.src_y) + u64::from(plane.src_h);
        if src_right > u64::from(fb.width) << 16 || src_bottom > u64::from(fb.height) << 16 {
            return Err(KmsError::NoSpace);
        }
        if plane.crtc_w == 0 || plane.crtc_h == 0 || plane.src_w == 0 || plane.src_h == 0 {
            return Err(KmsError::InvalidArgument);
        }
        if u64::from(plane.src_w) != u64::from(plane.crtc_w) << 16
            || u64::from(plane.src_h) != u64::from(plane.crtc_h) << 16
        {
            return Err(KmsError::OutOfRange);
        }
        if desc.plane_type == PlaneType::Cursor
            && (plane.crtc_w > self.cursor_max || plane.crtc_h > self.cursor_max)
        {
            return Err(KmsError::InvalidArgument);
        }
        Ok(())
    }

    /// Whether moving from `old` to `new` changes timing or routing of `crtc`
    fn needs_modeset(
        &self,
        old: &DisplayState,
        new: &DisplayState,
        crtc: CrtcId,
    ) -> KmsResult<bool> {
        let before = old.crtc(crtc)?;
        let after = new.crtc(crtc)?;
        if before.active != after.active {
            return Ok(true);
        }
        if before.mode != after.mode && self.mode_of(before.mode)? != self.mode_of(after.mode)? {
            return Ok(true);
        }
        let routed_before: BTreeSet<_> = old.routed_to(crtc).into_iter().collect();
        let routed_after: BTreeSet<_> = new.routed_to(crtc).into_iter().collect();
        Ok(routed_before != routed_after)
    }
}
