//! Damage-clip upload scenarios
//!
//! The primary scans out the left `w x h` of a buffer 64 pixels wider than
//! the mode. After each partial update the output checksum is compared
//! against what a full upload of the same buffer produces.

use super::fixture::{restore_primary, Setup};
use crate::context::KmsContext;
use crate::driver::CommitStyle;
use crate::error::{VerifyError, VerifyResult};
use kmsprobe_core::{Argb, DamageRect, PixelFormat, PlaneProperty, RelaxPolicy};
use kmsprobe_device::Platform;

const EXTRA_WIDTH: u32 = 64;

/// Commit the staged damage and return the output checksum
fn commit_damage<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    setup: &Setup,
    rects: &[DamageRect],
) -> VerifyResult<u32> {
    ctx.stage_damage(setup.primary, rects)?;
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)?;
    ctx.checksum(setup.pipe)
}

/// Re-submit the primary without damage so its whole source is uploaded
fn full_upload<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    setup: &Setup,
) -> VerifyResult<u32> {
    let fb = ctx.staged(setup.primary, PlaneProperty::FbId);
    ctx.stage(setup.primary, PlaneProperty::FbId, fb);
    commit_damage(ctx, setup, &[])
}

/// Update regions of the scanout buffer through damage clips
pub fn plane_damage<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    setup: &Setup,
) -> VerifyResult<()> {
    if !ctx.has(setup.primary, PlaneProperty::FbDamageClips) {
        return Err(VerifyError::unsupported("primary has no FB_DAMAGE_CLIPS"));
    }
    let (w, h) = setup.size();
    let crtc = ctx.model().pipe(setup.pipe).id();
    let wide = ctx.alloc_buffer(w + EXTRA_WIDTH, h, PixelFormat::XRGB8888)?;
    let src = DamageRect::from_size(0, 0, w, h);
    ctx.device().paint_pattern(wide.fb_id)?;
    ctx.stage_plane_region(setup.primary, crtc, wide.fb_id, src, 0, 0);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)?;

    // one rect, fully inside the source
    let rect = DamageRect::from_size(10, 10, 40, 40);
    ctx.device().fill_rect(wide.fb_id, rect, Argb::rgb(1.0, 0.0, 0.0))?;
    let partial = commit_damage(ctx, setup, &[rect])?;
    let full = full_upload(ctx, setup)?;
    if partial != full {
        return Err(checksum_error("single damage rect", full, partial));
    }

    // overlapping rects
    let rects = [
        DamageRect::from_size(30, 30, 40, 20),
        DamageRect::from_size(30, 40, 40, 30),
    ];
    for (r, color) in rects.iter().zip([Argb::rgb(0.0, 1.0, 0.0), Argb::rgb(0.0, 0.0, 1.0)]) {
        ctx.device().fill_rect(wide.fb_id, *r, color)?;
    }
    let partial = commit_damage(ctx, setup, &rects)?;
    let full = full_upload(ctx, setup)?;
    if partial != full {
        return Err(checksum_error("overlapping damage rects", full, partial));
    }

    // entirely outside the source crop: nothing visible changes
    let before = ctx.checksum(setup.pipe)?;
    let outside = DamageRect::from_size(w as i32 + 8, 8, 32, 32);
    ctx.device().fill_rect(wide.fb_id, outside, Argb::rgb(1.0, 1.0, 0.0))?;
    commit_damage(ctx, setup, &[outside])?;
    ctx.expect_checksum(setup.pipe, before, "damage outside source")?;

    // straddling the right edge of the source crop
    let straddle = DamageRect::from_size(w as i32 - 16, 16, 32, 32);
    ctx.device().fill_rect(wide.fb_id, straddle, Argb::rgb(1.0, 1.0, 1.0))?;
    let partial = commit_damage(ctx, setup, &[straddle])?;
    let full = full_upload(ctx, setup)?;
    if partial != full {
        return Err(checksum_error("damage clipped to source", full, partial));
    }

    // one clip inside the source, one entirely past its right edge
    let inside = DamageRect::from_size(60, 20, 24, 24);
    let beyond = DamageRect::from_size(w as i32 + 4, 40, 24, 24);
    ctx.device().fill_rect(wide.fb_id, inside, Argb::rgb(1.0, 0.0, 1.0))?;
    ctx.device().fill_rect(wide.fb_id, beyond, Argb::rgb(0.5, 0.5, 0.0))?;
    let partial = commit_damage(ctx, setup, &[inside, beyond])?;
    let full = full_upload(ctx, setup)?;
    if partial != full {
        return Err(checksum_error("clips inside and outside source", full, partial));
    }

    // pixels changed outside the damaged area stay stale until a full upload
    let before = ctx.checksum(setup.pipe)?;
    let changed = DamageRect::from_size(8, 100, 16, 16);
    let damaged = DamageRect::from_size(100, 8, 16, 16);
    ctx.device().fill_rect(wide.fb_id, changed, Argb::rgb(0.0, 1.0, 1.0))?;
    commit_damage(ctx, setup, &[damaged])?;
    ctx.expect_checksum(setup.pipe, before, "change outside damage")?;
    let full = full_upload(ctx, setup)?;
    if full == before {
        return Err(checksum_error("full upload after stale change", before ^ 1, full));
    }

    // flip to a second buffer holding the same pixels plus the damaged area
    let second = ctx.alloc_buffer(w + EXTRA_WIDTH, h, PixelFormat::XRGB8888)?;
    ctx.device().copy_buffer(wide.fb_id, second.fb_id)?;
    let flipped = DamageRect::from_size(40, 60, 32, 16);
    ctx.device().fill_rect(second.fb_id, flipped, Argb::rgb(0.25, 0.75, 0.5))?;
    ctx.stage(setup.primary, PlaneProperty::FbId, second.fb_id.value());
    let partial = commit_damage(ctx, setup, &[flipped])?;
    let full = full_upload(ctx, setup)?;
    if partial != full {
        return Err(checksum_error("damage with a flip", full, partial));
    }

    restore_primary(ctx, setup);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)?;
    ctx.free_buffer(second.fb_id)?;
    ctx.free_buffer(wide.fb_id)
}

fn checksum_error(context: &str, expected: u32, actual: u32) -> VerifyError {
    VerifyError::ChecksumMismatch {
        context: context.to_string(),
        expected,
        actual,
    }
}
