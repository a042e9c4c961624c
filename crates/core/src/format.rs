//! Pixel formats, colours and fixed-point coordinates

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sub-pixel bits of source-crop coordinates
pub const FIXED_SHIFT: u32 = 16;

/// Whole pixels to 16.16 fixed point
pub fn to_fixed(pixels: u32) -> u64 {
    u64::from(pixels) << FIXED_SHIFT
}

/// 16.16 fixed point to whole pixels, truncating
pub fn from_fixed(value: u64) -> u32 {
    (value >> FIXED_SHIFT) as u32
}

/// Linear (untiled) buffer layout
pub const MOD_LINEAR: u64 = 0;

const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

/// Four-character pixel format code
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelFormat(pub u32);

impl PixelFormat {
    /// 32-bit RGB, padding byte ignored
    pub const XRGB8888: PixelFormat = PixelFormat(fourcc(b'X', b'R', b'2', b'4'));
    /// 32-bit RGB with 8-bit alpha
    pub const ARGB8888: PixelFormat = PixelFormat(fourcc(b'A', b'R', b'2', b'4'));
    /// 16-bit RGB with 1-bit alpha
    pub const ARGB1555: PixelFormat = PixelFormat(fourcc(b'A', b'R', b'1', b'5'));

    /// Whether the alpha channel is honoured when blending
    pub fn has_alpha(self) -> bool {
        self == PixelFormat::ARGB8888 || self == PixelFormat::ARGB1555
    }

    /// Round a colour to what this format can store
    pub fn quantize(self, color: Argb) -> Argb {
        if self == PixelFormat::ARGB1555 {
            let (a, r, g, b) = color.channels();
            let five = |c: u8| {
                let q = c >> 3;
                (q << 3) | (q >> 2)
            };
            Argb::new(if a >= 0x80 { 0xff } else { 0 }, five(r), five(g), five(b))
        } else if self == PixelFormat::XRGB8888 {
            Argb(color.0 | 0xff00_0000)
        } else {
            color
        }
    }
}

impl fmt::Debug for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_le_bytes();
        write!(f, "{}", String::from_utf8_lossy(&bytes))
    }
}

/// 32-bit ARGB colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Argb(pub u32);

impl Argb {
    /// Opaque black
    pub const BLACK: Argb = Argb(0xff00_0000);
    /// Fully transparent
    pub const TRANSPARENT: Argb = Argb(0);

    /// Colour from channels
    pub fn new(a: u8, r: u8, g: u8, b: u8) -> Self {
        Argb(u32::from(a) << 24 | u32::from(r) << 16 | u32::from(g) << 8 | u32::from(b))
    }

    /// Opaque colour from unit-interval channels
    pub fn rgb(r: f64, g: f64, b: f64) -> Self {
        Self::rgba(r, g, b, 1.0)
    }

    /// Colour from unit-interval channels
    pub fn rgba(r: f64, g: f64, b: f64, a: f64) -> Self {
        let c = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self::new(c(a), c(r), c(g), c(b))
    }

    /// `(a, r, g, b)`
    pub fn channels(self) -> (u8, u8, u8, u8) {
        (
            (self.0 >> 24) as u8,
            (self.0 >> 16) as u8,
            (self.0 >> 8) as u8,
            self.0 as u8,
        )
    }

    /// Source-over blend of `self` onto `dst`
    pub fn over(self, dst: Argb) -> Argb {
        let (sa, sr, sg, sb) = self.channels();
        if sa == 0xff {
            return self;
        }
        if sa == 0 {
            return dst;
        }
        let (da, dr, dg, db) = dst.channels();
        let inv = 255 - u32::from(sa);
        let mix = |s: u8, d: u8| ((u32::from(s) * u32::from(sa) + u32::from(d) * inv) / 255) as u8;
        let a = (u32::from(sa) + u32::from(da) * inv / 255).min(255) as u8;
        Argb::new(a, mix(sr, dr), mix(sg, dg), mix(sb, db))
    }
}
