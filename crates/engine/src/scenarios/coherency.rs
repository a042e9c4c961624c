//! Cross-path coherency scenarios
//!
//! Each one changes surfaces through one commit style and checks that the
//! atomic and legacy query paths agree with what was staged.

use super::fixture::{restore_primary, Setup};
use crate::context::KmsContext;
use crate::driver::CommitStyle;
use crate::error::{VerifyError, VerifyResult};
use crate::model::PlaneHandle;
use kmsprobe_core::{Argb, DamageRect, PixelFormat, PlaneProperty, RelaxPolicy};
use kmsprobe_device::Platform;

fn first_overlay<P: Platform + 'static>(
    ctx: &KmsContext<P>,
    setup: &Setup,
) -> VerifyResult<PlaneHandle> {
    ctx.model()
        .pipe(setup.pipe)
        .overlays()
        .first()
        .copied()
        .ok_or_else(|| VerifyError::unsupported("no overlay plane"))
}

/// Overlay on and off through atomic, then through legacy
pub fn plane_overlay_legacy<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    setup: &Setup,
) -> VerifyResult<()> {
    let overlay = first_overlay(ctx, setup)?;
    let buffer = ctx.alloc_buffer(64, 64, PixelFormat::XRGB8888)?;
    ctx.device()
        .fill_rect(buffer.fb_id, DamageRect::from_size(0, 0, 64, 64), Argb::rgb(1.0, 0.0, 0.0))?;

    for style in [CommitStyle::atomic(), CommitStyle::Legacy] {
        ctx.stage_plane(overlay, setup.pipe, &buffer, 16, 16);
        ctx.commit_and_verify(style, style.relaxation())?;
        ctx.stage_plane_disabled(overlay);
        ctx.commit_and_verify(style, style.relaxation())?;
    }
    ctx.free_buffer(buffer.fb_id)
}

/// Primary off and on through legacy, flipped through universal, back through atomic
pub fn plane_primary_legacy<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    setup: &Setup,
) -> VerifyResult<()> {
    let relax = CommitStyle::Legacy.relaxation();
    ctx.stage_plane_disabled(setup.primary);
    ctx.stage_pipe_disabled(setup.pipe)?;
    ctx.commit_and_verify(CommitStyle::Legacy, relax)?;

    ctx.stage_pipe_enabled(setup.pipe, &setup.mode)?;
    restore_primary(ctx, setup);
    ctx.commit_and_verify(CommitStyle::Legacy, relax)?;

    let (w, h) = setup.size();
    let flip = ctx.alloc_buffer(w, h, PixelFormat::XRGB8888)?;
    ctx.device()
        .fill_rect(flip.fb_id, DamageRect::from_size(0, 0, w, h), Argb::rgb(0.0, 1.0, 0.0))?;
    ctx.stage_plane(setup.primary, setup.pipe, &flip, 0, 0);
    ctx.commit_and_verify(CommitStyle::Universal, RelaxPolicy::NONE)?;

    restore_primary(ctx, setup);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)?;
    ctx.free_buffer(flip.fb_id)
}

/// Cursor on and off through atomic, then through the legacy cursor calls
pub fn plane_cursor_legacy<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    setup: &Setup,
) -> VerifyResult<()> {
    let cursor = ctx
        .model()
        .pipe(setup.pipe)
        .cursor()
        .ok_or_else(|| VerifyError::unsupported("no cursor plane"))?;
    let size = ctx.config().cursor_size;
    let buffer = ctx.alloc_buffer(size, size, PixelFormat::ARGB8888)?;
    ctx.device().fill_rect(
        buffer.fb_id,
        DamageRect::from_size(0, 0, size, size),
        Argb::rgba(1.0, 1.0, 1.0, 0.5),
    )?;

    for style in [CommitStyle::atomic(), CommitStyle::Legacy] {
        ctx.stage_plane(cursor, setup.pipe, &buffer, 32, 32);
        ctx.commit_and_verify(style, style.relaxation())?;
        ctx.stage_plane_disabled(cursor);
        ctx.commit_and_verify(style, style.relaxation())?;
    }
    ctx.free_buffer(buffer.fb_id)
}

/// Transparent square cut into the overlay
const OVERLAY_HOLE: DamageRect = DamageRect {
    x1: 32,
    y1: 32,
    x2: 96,
    y2: 96,
};

/// Checksum of the primary alone showing the setup buffer with `red` painted over it
fn primary_reference<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    setup: &Setup,
    red: &[DamageRect],
) -> VerifyResult<u32> {
    let (w, h) = setup.size();
    let reference = ctx.alloc_buffer(w, h, PixelFormat::XRGB8888)?;
    ctx.device().copy_buffer(setup.buffer.fb_id, reference.fb_id)?;
    for rect in red {
        ctx.device().fill_rect(reference.fb_id, *rect, Argb::rgb(1.0, 0.0, 0.0))?;
    }
    ctx.stage_plane(setup.primary, setup.pipe, &reference, 0, 0);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)?;
    let crc = ctx.checksum(setup.pipe)?;
    restore_primary(ctx, setup);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)?;
    ctx.free_buffer(reference.fb_id)?;
    Ok(crc)
}

fn stage_zpos<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    primary: PlaneHandle,
    overlay: PlaneHandle,
    (p, o): (u64, u64),
) -> VerifyResult<()> {
    ctx.stage(primary, PlaneProperty::Zpos, p);
    ctx.stage(overlay, PlaneProperty::Zpos, o);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)?;
    for (plane, want) in [(primary, p), (overlay, o)] {
        let got = ctx.get(plane, PlaneProperty::Zpos)?;
        if got != want {
            return Err(VerifyError::Mismatch {
                path: crate::error::QueryPath::Atomic,
                object: ctx.model().plane(plane).id().object(),
                property: "zpos",
                expected: want.to_string(),
                actual: got.to_string(),
            });
        }
    }
    Ok(())
}

/// Overlay with a transparent hole above the primary, then swapped below
///
/// With the overlay on top the primary shows through its hole. With the
/// opaque primary on top the overlay is hidden. A primary with its own hole
/// then shows the overlay underneath.
pub fn plane_primary_overlay_mutable_zpos<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    setup: &Setup,
) -> VerifyResult<()> {
    let overlay = first_overlay(ctx, setup)?;
    let primary = setup.primary;
    let model = ctx.model();
    for plane in [primary, overlay] {
        let state = model.plane(plane).state();
        if !state.has(PlaneProperty::Zpos) || state.is_immutable(PlaneProperty::Zpos) {
            return Err(VerifyError::unsupported("zpos is not mutable"));
        }
    }
    let (w, h) = setup.size();
    if w < 192 || h < 192 {
        return Err(VerifyError::unsupported("mode too small for both holes"));
    }
    let initial = (
        ctx.staged(primary, PlaneProperty::Zpos),
        ctx.staged(overlay, PlaneProperty::Zpos),
    );
    let primary_hole = DamageRect::from_size(w as i32 / 2, h as i32 / 2, w / 4, h / 4);

    let primary_only = ctx.checksum(setup.pipe)?;
    let around_hole = [
        DamageRect::from_size(0, 0, w, OVERLAY_HOLE.y1 as u32),
        DamageRect::new(0, OVERLAY_HOLE.y2, w as i32, h as i32),
        DamageRect::new(0, OVERLAY_HOLE.y1, OVERLAY_HOLE.x1, OVERLAY_HOLE.y2),
        DamageRect::new(OVERLAY_HOLE.x2, OVERLAY_HOLE.y1, w as i32, OVERLAY_HOLE.y2),
    ];
    let overlay_on_top = primary_reference(ctx, setup, &around_hole)?;
    let overlay_through_primary = primary_reference(ctx, setup, &[primary_hole])?;

    let overlay_buf = ctx.alloc_buffer(w, h, PixelFormat::ARGB8888)?;
    ctx.device().fill_rect(
        overlay_buf.fb_id,
        DamageRect::from_size(0, 0, w, h),
        Argb::rgb(1.0, 0.0, 0.0),
    )?;
    ctx.device()
        .fill_rect(overlay_buf.fb_id, OVERLAY_HOLE, Argb::TRANSPARENT)?;
    ctx.stage_plane(overlay, setup.pipe, &overlay_buf, 0, 0);

    stage_zpos(ctx, primary, overlay, (0, 1))?;
    ctx.expect_checksum(setup.pipe, overlay_on_top, "primary through overlay hole")?;

    stage_zpos(ctx, primary, overlay, (1, 0))?;
    ctx.expect_checksum(setup.pipe, primary_only, "primary above overlay")?;

    let holed = ctx.alloc_buffer(w, h, PixelFormat::ARGB8888)?;
    ctx.device().copy_buffer(setup.buffer.fb_id, holed.fb_id)?;
    ctx.device()
        .fill_rect(holed.fb_id, primary_hole, Argb::TRANSPARENT)?;
    ctx.stage_plane(primary, setup.pipe, &holed, 0, 0);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)?;
    ctx.expect_checksum(setup.pipe, overlay_through_primary, "overlay through primary hole")?;

    restore_primary(ctx, setup);
    ctx.stage_plane_disabled(overlay);
    stage_zpos(ctx, primary, overlay, initial)?;
    ctx.free_buffer(holed.fb_id)?;
    ctx.free_buffer(overlay_buf.fb_id)
}

fn expect_test_only_ok<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    context: &str,
) -> VerifyResult<()> {
    let result = ctx.verify_test_only()?;
    if let Err(e) = result {
        return Err(VerifyError::UnexpectedOutcome {
            context: context.to_string(),
            expected: 0,
            actual: e.code(),
        });
    }
    Ok(())
}

/// Test-only checks ahead of real disable and enable transitions
pub fn test_only<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    setup: &Setup,
) -> VerifyResult<()> {
    let disable = |ctx: &mut KmsContext<P>| -> VerifyResult<()> {
        for plane in ctx.model().plane_handles().collect::<Vec<_>>() {
            ctx.stage_plane_disabled(plane);
        }
        ctx.stage_pipe_disabled(setup.pipe)
    };
    let enable = |ctx: &mut KmsContext<P>| -> VerifyResult<()> {
        ctx.stage_pipe_enabled(setup.pipe, &setup.mode)?;
        restore_primary(ctx, setup);
        Ok(())
    };

    disable(ctx)?;
    expect_test_only_ok(ctx, "test-only disable")?;
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)?;

    enable(ctx)?;
    expect_test_only_ok(ctx, "test-only enable")?;
    ctx.commit_and_verify(CommitStyle::Legacy, CommitStyle::Legacy.relaxation())?;

    disable(ctx)?;
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)?;
    enable(ctx)?;
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
}
