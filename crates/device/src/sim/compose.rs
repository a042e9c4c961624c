//! Pixel operations and output checksums
//!
//! The output of a pipeline is composed from what each of its surfaces
//! currently scans out, bottom to top by `(zpos, id)`, onto an opaque black
//! canvas of the mode size. The checksum is a CRC-32 of the canvas.

use super::state::SimState;
use byteorder::{ByteOrder, LittleEndian};
use kmsprobe_core::{Argb, CrtcId, DamageRect, FbId, KmsError, KmsResult};

impl SimState {
    pub fn fill_rect(&mut self, fb: FbId, rect: DamageRect, color: Argb) -> KmsResult<()> {
        let bo = self.buffer_mut(fb)?;
        let color = bo.format.quantize(color);
        let bounds = DamageRect::from_size(0, 0, bo.width, bo.height);
        let Some(area) = rect.intersect(&bounds) else {
            return Ok(());
        };
        for y in area.y1..area.y2 {
            let row = (y as u32 * bo.width) as usize;
            for x in area.x1..area.x2 {
                bo.pixels[row + x as usize] = color.0;
            }
        }
        Ok(())
    }

    pub fn paint_pattern(&mut self, fb: FbId) -> KmsResult<()> {
        let bo = self.buffer_mut(fb)?;
        let (w, h) = (bo.width, bo.height);
        for y in 0..h {
            for x in 0..w {
                let color = Argb::new(
                    0xff,
                    (x * 255 / w.max(2).saturating_sub(1)) as u8,
                    (y * 255 / h.max(2).saturating_sub(1)) as u8,
                    ((x ^ y) & 0xff) as u8,
                );
                bo.pixels[(y * w + x) as usize] = bo.format.quantize(color).0;
            }
        }
        Ok(())
    }

    pub fn copy_buffer(&mut self, src: FbId, dst: FbId) -> KmsResult<()> {
        let from = self.buffer(src)?.clone();
        let to = self.buffer_mut(dst)?;
        let w = from.width.min(to.width);
        let h = from.height.min(to.height);
        for y in 0..h {
            for x in 0..w {
                let color = to.format.quantize(from.pixel(x, y));
                to.pixels[(y * to.width + x) as usize] = color.0;
            }
        }
        Ok(())
    }

    /// CRC-32 of what an active pipeline is sending to its outputs
    pub fn output_checksum(&self, crtc: CrtcId) -> KmsResult<u32> {
        let state = self.current.crtc(crtc)?;
        if !state.active {
            return Err(KmsError::InvalidArgument);
        }
        let mode = self.mode_of(state.mode)?.ok_or(KmsError::InvalidArgument)?;
        let (width, height) = (u32::from(mode.hdisplay), u32::from(mode.vdisplay));
        let mut canvas = vec![Argb::BLACK.0; (width * height) as usize];

        let mut layers: Vec<_> = self
            .current
            .planes
            .iter()
            .filter(|(_, p)| p.crtc == crtc)
            .filter_map(|(id, p)| self.scanout.get(id).map(|s| (p.zpos, *id, p, s)))
            .collect();
        layers.sort_by_key(|(zpos, id, _, _)| (*zpos, *id));

        for (_, _, plane, scanout) in layers {
            let alpha = scanout.format.has_alpha();
            let w = scanout.width.min(plane.crtc_w);
            let h = scanout.height.min(plane.crtc_h);
            for sy in 0..h {
                let dy = i64::from(plane.crtc_y) + i64::from(sy);
                if dy < 0 || dy >= i64::from(height) {
                    continue;
                }
                for sx in 0..w {
                    let dx = i64::from(plane.crtc_x) + i64::from(sx);
                    if dx < 0 || dx >= i64::from(width) {
                        continue;
                    }
                    let mut src = Argb(scanout.pixels[(sy * scanout.width + sx) as usize]);
                    if !alpha {
                        src = Argb(src.0 | 0xff00_0000);
                    }
                    let slot = &mut canvas[(dy as u32 * width + dx as u32) as usize];
                    *slot = src.over(Argb(*slot)).0;
                }
            }
        }

        let mut bytes = vec![0u8; canvas.len() * 4];
        LittleEndian::write_u32_into(&canvas, &mut bytes);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes);
        Ok(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use kmsprobe_core::PixelFormat;

    #[test]
    fn test_fill_rect_is_clipped() {
        let mut sim = SimState::new(&SimConfig::default());
        let buf = sim.alloc_buffer(4, 4, PixelFormat::XRGB8888).unwrap();
        sim.fill_rect(buf.fb_id, DamageRect::new(2, 2, 10, 10), Argb::new(0xff, 1, 2, 3))
            .unwrap();
        let bo = sim.buffer(buf.fb_id).unwrap();
        assert_eq!(bo.pixel(3, 3), Argb::new(0xff, 1, 2, 3));
        assert_eq!(bo.pixel(1, 1), Argb(0xff00_0000));
    }

    #[test]
    fn test_copy_buffer_quantizes_to_destination() {
        let mut sim = SimState::new(&SimConfig::default());
        let a = sim.alloc_buffer(2, 2, PixelFormat::ARGB8888).unwrap();
        let b = sim.alloc_buffer(2, 2, PixelFormat::ARGB1555).unwrap();
        sim.fill_rect(a.fb_id, DamageRect::new(0, 0, 2, 2), Argb::new(0xff, 0x13, 0x57, 0x9b))
            .unwrap();
        sim.copy_buffer(a.fb_id, b.fb_id).unwrap();
        let expected = PixelFormat::ARGB1555.quantize(Argb::new(0xff, 0x13, 0x57, 0x9b));
        assert_eq!(sim.buffer(b.fb_id).unwrap().pixel(1, 1), expected);
    }

    #[test]
    fn test_checksum_requires_active_pipe() {
        let sim = SimState::new(&SimConfig::default());
        let crtc = sim.crtcs[0].id;
        assert_eq!(sim.output_checksum(crtc), Err(KmsError::InvalidArgument));
    }
}
