//! Damage rectangles
//!
//! `FB_DAMAGE_CLIPS` carries a packed array of rectangles in framebuffer
//! coordinates, 16 bytes each. Rectangles are half-open: `x2`/`y2` are
//! exclusive.

use crate::error::{KmsError, KmsResult};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Encoded size of one rectangle
pub const DAMAGE_RECT_SIZE: usize = 16;

/// Axis-aligned rectangle, half-open on the far edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DamageRect {
    /// Left edge
    pub x1: i32,
    /// Top edge
    pub y1: i32,
    /// Right edge, exclusive
    pub x2: i32,
    /// Bottom edge, exclusive
    pub y2: i32,
}

impl DamageRect {
    /// Rectangle from corners
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        DamageRect { x1, y1, x2, y2 }
    }

    /// Rectangle from origin and size
    pub fn from_size(x: i32, y: i32, w: u32, h: u32) -> Self {
        DamageRect {
            x1: x,
            y1: y,
            x2: x.saturating_add(w as i32),
            y2: y.saturating_add(h as i32),
        }
    }

    /// Width, zero when inverted
    pub fn width(&self) -> u32 {
        (self.x2 - self.x1).max(0) as u32
    }

    /// Height, zero when inverted
    pub fn height(&self) -> u32 {
        (self.y2 - self.y1).max(0) as u32
    }

    /// Covers no pixel
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Overlap of two rectangles, `None` if they do not intersect
    pub fn intersect(&self, other: &DamageRect) -> Option<DamageRect> {
        let r = DamageRect {
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
            x2: self.x2.min(other.x2),
            y2: self.y2.min(other.y2),
        };
        if r.is_empty() {
            None
        } else {
            Some(r)
        }
    }

    /// Whether a pixel lies inside
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x1 && x < self.x2 && y >= self.y1 && y < self.y2
    }
}

/// Pack rectangles into a blob payload
pub fn encode_rects(rects: &[DamageRect]) -> Vec<u8> {
    let mut buf = vec![0u8; rects.len() * DAMAGE_RECT_SIZE];
    for (chunk, r) in buf.chunks_exact_mut(DAMAGE_RECT_SIZE).zip(rects) {
        LittleEndian::write_i32(&mut chunk[0..4], r.x1);
        LittleEndian::write_i32(&mut chunk[4..8], r.y1);
        LittleEndian::write_i32(&mut chunk[8..12], r.x2);
        LittleEndian::write_i32(&mut chunk[12..16], r.y2);
    }
    buf
}

/// Unpack a blob payload; the length must be a whole number of rectangles
pub fn decode_rects(bytes: &[u8]) -> KmsResult<Vec<DamageRect>> {
    if bytes.len() % DAMAGE_RECT_SIZE != 0 {
        return Err(KmsError::InvalidArgument);
    }
    Ok(bytes
        .chunks_exact(DAMAGE_RECT_SIZE)
        .map(|c| DamageRect {
            x1: LittleEndian::read_i32(&c[0..4]),
            y1: LittleEndian::read_i32(&c[4..8]),
            x2: LittleEndian::read_i32(&c[8..12]),
            y2: LittleEndian::read_i32(&c[12..16]),
        })
        .collect())
}
