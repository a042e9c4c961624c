//! Mode timing blob
//!
//! The payload of a `MODE_ID` blob is a packed little-endian record of
//! exactly [`MODE_INFO_SIZE`] bytes. Any other length is rejected by the
//! device, which is what the blob size probes rely on.

use crate::error::{KmsError, KmsResult};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoded size of a mode blob
pub const MODE_INFO_SIZE: usize = 68;

/// Length of the mode name field
pub const MODE_NAME_LEN: usize = 32;

/// Mode type bit marking the preferred mode of an output
pub const MODE_TYPE_PREFERRED: u32 = 1 << 3;

/// Mode type bit marking a mode supplied by the driver
pub const MODE_TYPE_DRIVER: u32 = 1 << 6;

/// Display mode timing
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ModeInfo {
    /// Pixel clock in kHz
    pub clock: u32,
    /// Active width
    pub hdisplay: u16,
    /// Horizontal sync start
    pub hsync_start: u16,
    /// Horizontal sync end
    pub hsync_end: u16,
    /// Horizontal total
    pub htotal: u16,
    /// Horizontal skew
    pub hskew: u16,
    /// Active height
    pub vdisplay: u16,
    /// Vertical sync start
    pub vsync_start: u16,
    /// Vertical sync end
    pub vsync_end: u16,
    /// Vertical total
    pub vtotal: u16,
    /// Vertical scan
    pub vscan: u16,
    /// Refresh rate in Hz
    pub vrefresh: u32,
    /// Sync and interlace flags
    pub flags: u32,
    /// Mode type bits
    pub mode_type: u32,
    /// NUL-padded name
    pub name: [u8; MODE_NAME_LEN],
}

impl ModeInfo {
    /// Build a progressive mode with simple reduced-blanking timings
    pub fn new(hdisplay: u16, vdisplay: u16, vrefresh: u32) -> Self {
        let hsync_start = hdisplay.saturating_add(48);
        let hsync_end = hsync_start.saturating_add(32);
        let htotal = hsync_end.saturating_add(80);
        let vsync_start = vdisplay.saturating_add(3);
        let vsync_end = vsync_start.saturating_add(5);
        let vtotal = vsync_end.saturating_add(20);
        let clock = (u64::from(htotal) * u64::from(vtotal) * u64::from(vrefresh) / 1000) as u32;

        let mut name = [0u8; MODE_NAME_LEN];
        let label = format!("{}x{}", hdisplay, vdisplay);
        let n = label.len().min(MODE_NAME_LEN - 1);
        name[..n].copy_from_slice(&label.as_bytes()[..n]);

        ModeInfo {
            clock,
            hdisplay,
            hsync_start,
            hsync_end,
            htotal,
            hskew: 0,
            vdisplay,
            vsync_start,
            vsync_end,
            vtotal,
            vscan: 0,
            vrefresh,
            flags: 0,
            mode_type: MODE_TYPE_DRIVER | MODE_TYPE_PREFERRED,
            name,
        }
    }

    /// Name up to the first NUL
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(MODE_NAME_LEN);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// Serialize to the blob layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; MODE_INFO_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.clock);
        LittleEndian::write_u16(&mut buf[4..6], self.hdisplay);
        LittleEndian::write_u16(&mut buf[6..8], self.hsync_start);
        LittleEndian::write_u16(&mut buf[8..10], self.hsync_end);
        LittleEndian::write_u16(&mut buf[10..12], self.htotal);
        LittleEndian::write_u16(&mut buf[12..14], self.hskew);
        LittleEndian::write_u16(&mut buf[14..16], self.vdisplay);
        LittleEndian::write_u16(&mut buf[16..18], self.vsync_start);
        LittleEndian::write_u16(&mut buf[18..20], self.vsync_end);
        LittleEndian::write_u16(&mut buf[20..22], self.vtotal);
        LittleEndian::write_u16(&mut buf[22..24], self.vscan);
        LittleEndian::write_u32(&mut buf[24..28], self.vrefresh);
        LittleEndian::write_u32(&mut buf[28..32], self.flags);
        LittleEndian::write_u32(&mut buf[32..36], self.mode_type);
        buf[36..68].copy_from_slice(&self.name);
        buf
    }

    /// Parse a blob payload; the length must be exact
    pub fn from_bytes(bytes: &[u8]) -> KmsResult<Self> {
        if bytes.len() != MODE_INFO_SIZE {
            return Err(KmsError::InvalidArgument);
        }
        let mut name = [0u8; MODE_NAME_LEN];
        name.copy_from_slice(&bytes[36..68]);
        Ok(ModeInfo {
            clock: LittleEndian::read_u32(&bytes[0..4]),
            hdisplay: LittleEndian::read_u16(&bytes[4..6]),
            hsync_start: LittleEndian::read_u16(&bytes[6..8]),
            hsync_end: LittleEndian::read_u16(&bytes[8..10]),
            htotal: LittleEndian::read_u16(&bytes[10..12]),
            hskew: LittleEndian::read_u16(&bytes[12..14]),
            vdisplay: LittleEndian::read_u16(&bytes[14..16]),
            vsync_start: LittleEndian::read_u16(&bytes[16..18]),
            vsync_end: LittleEndian::read_u16(&bytes[18..20]),
            vtotal: LittleEndian::read_u16(&bytes[20..22]),
            vscan: LittleEndian::read_u16(&bytes[22..24]),
            vrefresh: LittleEndian::read_u32(&bytes[24..28]),
            flags: LittleEndian::read_u32(&bytes[28..32]),
            mode_type: LittleEndian::read_u32(&bytes[32..36]),
            name,
        })
    }

    /// Timing sanity check applied when a mode is set
    pub fn validate(&self) -> KmsResult<()> {
        let horizontal_ok = self.hdisplay > 0
            && self.hdisplay <= self.hsync_start
            && self.hsync_start <= self.hsync_end
            && self.hsync_end <= self.htotal;
        let vertical_ok = self.vdisplay > 0
            && self.vdisplay <= self.vsync_start
            && self.vsync_start <= self.vsync_end
            && self.vsync_end <= self.vtotal;
        if self.clock == 0 || !horizontal_ok || !vertical_ok {
            return Err(KmsError::InvalidArgument);
        }
        Ok(())
    }
}

impl fmt::Debug for ModeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ModeInfo({} {}x{}@{} clock={})",
            self.name(),
            self.hdisplay,
            self.vdisplay,
            self.vrefresh,
            self.clock
        )
    }
}
