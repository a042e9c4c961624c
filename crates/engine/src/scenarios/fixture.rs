//! Per-scenario setup and teardown

use crate::context::KmsContext;
use crate::driver::CommitStyle;
use crate::error::VerifyResult;
use crate::model::{PipeHandle, PlaneHandle};
use kmsprobe_core::{ModeInfo, PixelFormat, RelaxPolicy};
use kmsprobe_device::{Buffer, Platform};

/// What [`atomic_setup`] left lit
#[derive(Debug, Clone, Copy)]
pub struct Setup {
    /// Pipeline under test
    pub pipe: PipeHandle,
    /// Mode the pipeline runs
    pub mode: ModeInfo,
    /// Primary surface
    pub primary: PlaneHandle,
    /// Full-screen buffer on the primary
    pub buffer: Buffer,
}

impl Setup {
    /// Active width and height
    pub fn size(&self) -> (u32, u32) {
        (u32::from(self.mode.hdisplay), u32::from(self.mode.vdisplay))
    }
}

/// Stage every surface detached and drop any per-commit request
pub(crate) fn stage_all_planes_off<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
) -> VerifyResult<()> {
    for plane in ctx.model().plane_handles().collect::<Vec<_>>() {
        ctx.stage_plane_disabled(plane);
        ctx.stage_in_fence(plane, None);
        ctx.stage_damage(plane, &[])?;
    }
    Ok(())
}

/// Reset everything, route the output and put a full-screen primary up
pub fn atomic_setup<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    pipe: PipeHandle,
) -> VerifyResult<Setup> {
    let mode = ctx.preferred_mode(pipe)?;
    stage_all_planes_off(ctx)?;
    for other in ctx.model().pipe_handles().collect::<Vec<_>>() {
        ctx.clear_out_fence(other);
        if other != pipe {
            ctx.stage_pipe_disabled(other)?;
        }
    }

    let buffer = ctx.alloc_buffer(
        u32::from(mode.hdisplay),
        u32::from(mode.vdisplay),
        PixelFormat::XRGB8888,
    )?;
    ctx.device().paint_pattern(buffer.fb_id)?;
    let primary = ctx.model().pipe(pipe).primary();
    ctx.stage_pipe_enabled(pipe, &mode)?;
    ctx.stage_plane(primary, pipe, &buffer, 0, 0);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)?;
    Ok(Setup {
        pipe,
        mode,
        primary,
        buffer,
    })
}

/// Put the setup's primary back exactly as [`atomic_setup`] left it
pub fn restore_primary<P: Platform + 'static>(ctx: &mut KmsContext<P>, setup: &Setup) {
    ctx.stage_plane(setup.primary, setup.pipe, &setup.buffer, 0, 0);
}

/// Detach every surface, unroute the output and turn the pipeline off
pub fn atomic_clear<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    setup: Setup,
) -> VerifyResult<()> {
    stage_all_planes_off(ctx)?;
    ctx.clear_out_fence(setup.pipe);
    ctx.stage_pipe_disabled(setup.pipe)?;
    let committed = ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE);
    let freed = ctx.free_buffer(setup.buffer.fb_id);
    committed.and(freed)
}
