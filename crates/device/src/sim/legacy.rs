//! Legacy (pre-atomic) entry points
//!
//! Each call is translated into a candidate state and pushed through the
//! same check and commit as an atomic transaction, with modesets allowed.

use super::state::{DisplayState, SimState};
use crate::traits::{LegacyCrtc, LegacyPlane, PlaneConfig};
use kmsprobe_core::{
    BlobId, ConnectorId, CrtcId, FbId, KmsError, KmsResult, ModeInfo, PixelFormat, PlaneId,
};
use std::collections::BTreeSet;

impl SimState {
    fn apply_legacy(&mut self, new: DisplayState, touched: BTreeSet<PlaneId>) -> KmsResult<()> {
        if let Err(e) = self.check_state(&self.current, &new, true) {
            self.collect_garbage();
            return Err(e);
        }
        self.commit_state(new, &touched)
    }

    pub fn get_crtc(&self, id: CrtcId) -> KmsResult<LegacyCrtc> {
        let desc = self.crtc_desc(id)?;
        let crtc = self.current.crtc(id)?;
        let primary = self
            .primary_for(desc)
            .map(|p| self.current.plane(p))
            .transpose()?
            .filter(|p| p.crtc == id);
        let mode = self.mode_of(crtc.mode)?;
        Ok(LegacyCrtc {
            crtc_id: id,
            buffer_id: primary.map_or(FbId::NONE, |p| p.fb),
            x: primary.map_or(0, |p| p.src_x >> 16),
            y: primary.map_or(0, |p| p.src_y >> 16),
            width: mode.map_or(0, |m| u32::from(m.hdisplay)),
            height: mode.map_or(0, |m| u32::from(m.vdisplay)),
            mode_valid: mode.is_some(),
            mode: mode.unwrap_or_default(),
        })
    }

    pub fn set_crtc(
        &mut self,
        id: CrtcId,
        fb: FbId,
        x: u32,
        y: u32,
        connectors: &[ConnectorId],
        mode: Option<&ModeInfo>,
    ) -> KmsResult<()> {
        let desc = self.crtc_desc(id)?.clone();
        let mut new = self.current.clone();
        let mut touched = BTreeSet::new();

        let Some(mode) = mode else {
            let crtc = new.crtc_mut(id)?;
            crtc.active = false;
            crtc.mode = BlobId::NONE;
            for routed in new.connectors.values_mut() {
                if *routed == id {
                    *routed = CrtcId::NONE;
                }
            }
            for (plane_id, plane) in new.planes.iter_mut() {
                if plane.crtc == id {
                    plane.disable();
                    touched.insert(*plane_id);
                }
            }
            return self.apply_legacy(new, touched);
        };

        mode.validate()?;
        if fb.is_none() || connectors.is_empty() {
            return Err(KmsError::InvalidArgument);
        }
        let info = self.fbs.get(&fb).ok_or(KmsError::NoEntry)?;
        for conn in connectors {
            self.connector_desc(*conn)?;
        }
        let (hdisplay, vdisplay) = (u32::from(mode.hdisplay), u32::from(mode.vdisplay));
        if u64::from(x) + u64::from(hdisplay) > u64::from(info.width)
            || u64::from(y) + u64::from(vdisplay) > u64::from(info.height)
        {
            return Err(KmsError::NoSpace);
        }
        let primary = self.primary_for(&desc).ok_or(KmsError::NoEntry)?;

        let blob = match self.mode_of(self.current.crtc(id)?.mode)? {
            Some(current) if current == *mode => self.current.crtc(id)?.mode,
            _ => self.create_blob(&mode.to_bytes(), false)?,
        };
        let crtc = new.crtc_mut(id)?;
        crtc.active = true;
        crtc.mode = blob;
        for (conn, routed) in new.connectors.iter_mut() {
            if connectors.contains(conn) {
                *routed = id;
            } else if *routed == id {
                *routed = CrtcId::NONE;
            }
        }

        let plane = new.plane_mut(primary)?;
        plane.crtc = id;
        plane.fb = fb;
        plane.src_x = x << 16;
        plane.src_y = y << 16;
        plane.src_w = hdisplay << 16;
        plane.src_h = vdisplay << 16;
        plane.crtc_x = 0;
        plane.crtc_y = 0;
        plane.crtc_w = hdisplay;
        plane.crtc_h = vdisplay;
        touched.insert(primary);

        self.apply_legacy(new, touched)
    }

    pub fn get_plane(&self, id: PlaneId) -> KmsResult<LegacyPlane> {
        let desc = self.plane_desc(id)?;
        let plane = self.current.plane(id)?;
        Ok(LegacyPlane {
            plane_id: id,
            crtc_id: plane.crtc,
            fb_id: plane.fb,
            crtc_x: plane.crtc_x,
            crtc_y: plane.crtc_y,
            x: plane.src_x >> 16,
            y: plane.src_y >> 16,
            possible_crtcs: desc.possible_crtcs,
            formats: desc.formats.clone(),
        })
    }

    pub fn set_plane(&mut self, id: PlaneId, config: &PlaneConfig) -> KmsResult<()> {
        self.plane_desc(id)?;
        let mut new = self.current.clone();
        let plane = new.plane_mut(id)?;
        if config.fb_id.is_none() {
            plane.disable();
        } else {
            self.crtc_desc(config.crtc_id)?;
            if !self.fbs.contains_key(&config.fb_id) {
                return Err(KmsError::NoEntry);
            }
            plane.crtc = config.crtc_id;
            plane.fb = config.fb_id;
            plane.crtc_x = config.crtc_x;
            plane.crtc_y = config.crtc_y;
            plane.crtc_w = config.crtc_w;
            plane.crtc_h = config.crtc_h;
            plane.src_x = config.src_x;
            plane.src_y = config.src_y;
            plane.src_w = config.src_w;
            plane.src_h = config.src_h;
        }
        self.apply_legacy(new, BTreeSet::from([id]))
    }

    pub fn set_cursor(
        &mut self,
        crtc: CrtcId,
        handle: u32,
        width: u32,
        height: u32,
    ) -> KmsResult<()> {
        let cursor = self.crtc_desc(crtc)?.cursor.ok_or(KmsError::NoEntry)?;
        let mut new = self.current.clone();
        if handle == 0 {
            new.plane_mut(cursor)?.disable();
            return self.apply_legacy(new, BTreeSet::from([cursor]));
        }
        if width == 0 || height == 0 || width > self.cursor_max || height > self.cursor_max {
            return Err(KmsError::InvalidArgument);
        }
        if self.bos.get(&handle).map(|bo| bo.format) != Some(PixelFormat::ARGB8888) {
            return Err(if self.bos.contains_key(&handle) {
                KmsError::InvalidArgument
            } else {
                KmsError::NoEntry
            });
        }
        let fb = self.create_internal_fb(handle, width, height)?;
        let (x, y) = self.cursor_pos.get(&crtc).copied().unwrap_or((0, 0));
        let plane = new.plane_mut(cursor)?;
        plane.crtc = crtc;
        plane.fb = fb;
        plane.src_x = 0;
        plane.src_y = 0;
        plane.src_w = width << 16;
        plane.src_h = height << 16;
        plane.crtc_x = x;
        plane.crtc_y = y;
        plane.crtc_w = width;
        plane.crtc_h = height;
        self.apply_legacy(new, BTreeSet::from([cursor]))
    }

    pub fn move_cursor(&mut self, crtc: CrtcId, x: i32, y: i32) -> KmsResult<()> {
        let cursor = self.crtc_desc(crtc)?.cursor;
        self.cursor_pos.insert(crtc, (x, y));
        let Some(cursor) = cursor else {
            return Ok(());
        };
        if self.current.plane(cursor)?.fb.is_none() {
            return Ok(());
        }
        let mut new = self.current.clone();
        let plane = new.plane_mut(cursor)?;
        plane.crtc_x = x;
        plane.crtc_y = y;
        self.apply_legacy(new, BTreeSet::from([cursor]))
    }
}
