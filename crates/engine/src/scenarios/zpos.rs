//! Immutable zpos occlusion
//!
//! For each adjacent pair of surfaces in zpos order, a full-screen blue
//! lower surface with a small yellow upper surface must produce the same
//! output as a single primary with the square painted in.

use super::fixture::{restore_primary, Setup};
use crate::context::KmsContext;
use crate::driver::CommitStyle;
use crate::error::{VerifyError, VerifyResult};
use kmsprobe_core::{Argb, DamageRect, PixelFormat, PlaneProperty, RelaxPolicy};
use kmsprobe_device::Platform;
use tracing::debug;

const SQUARE: DamageRect = DamageRect {
    x1: 32,
    y1: 32,
    x2: 96,
    y2: 96,
};

fn blue() -> Argb {
    Argb::rgb(0.0, 0.0, 1.0)
}

fn yellow() -> Argb {
    Argb::rgb(1.0, 1.0, 0.0)
}

/// Each upper surface in zpos order covers the one below it
pub fn plane_immutable_zpos<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    setup: &Setup,
) -> VerifyResult<()> {
    let stack = ctx.model().stackable_planes(setup.pipe);
    if stack.len() < 2 {
        return Err(VerifyError::unsupported("fewer than two stackable planes"));
    }
    if stack.iter().any(|p| !ctx.has(*p, PlaneProperty::Zpos)) {
        return Err(VerifyError::unsupported("planes do not report zpos"));
    }

    let (w, h) = setup.size();
    let reference = ctx.alloc_buffer(w, h, PixelFormat::XRGB8888)?;
    ctx.device()
        .fill_rect(reference.fb_id, DamageRect::from_size(0, 0, w, h), blue())?;
    ctx.device().fill_rect(reference.fb_id, SQUARE, yellow())?;
    ctx.stage_plane(setup.primary, setup.pipe, &reference, 0, 0);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)?;
    let expected = ctx.checksum(setup.pipe)?;

    let lower_buf = ctx.alloc_buffer(w, h, PixelFormat::XRGB8888)?;
    ctx.device()
        .fill_rect(lower_buf.fb_id, DamageRect::from_size(0, 0, w, h), blue())?;
    let upper_buf = ctx.alloc_buffer(SQUARE.width(), SQUARE.height(), PixelFormat::ARGB8888)?;
    ctx.device().fill_rect(
        upper_buf.fb_id,
        DamageRect::from_size(0, 0, SQUARE.width(), SQUARE.height()),
        yellow(),
    )?;

    for pair in stack.windows(2) {
        let (lower, upper) = (pair[0], pair[1]);
        for plane in &stack {
            ctx.stage_plane_disabled(*plane);
        }
        ctx.stage_plane(lower, setup.pipe, &lower_buf, 0, 0);
        ctx.stage_plane(upper, setup.pipe, &upper_buf, SQUARE.x1, SQUARE.y1);
        ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)?;
        debug!(
            target: "kmsprobe::scenario",
            lower = %ctx.model().plane(lower).id(),
            upper = %ctx.model().plane(upper).id(),
            "checking occlusion"
        );
        ctx.expect_checksum(setup.pipe, expected, "upper plane over lower plane")?;
    }

    for plane in &stack {
        ctx.stage_plane_disabled(*plane);
    }
    restore_primary(ctx, setup);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)?;
    for fb in [reference.fb_id, lower_buf.fb_id, upper_buf.fb_id] {
        ctx.free_buffer(fb)?;
    }
    Ok(())
}
