//! Blocking input fences

use super::fixture::Setup;
use crate::context::KmsContext;
use crate::driver::CommitStyle;
use crate::error::VerifyResult;
use kmsprobe_core::{KmsError, RelaxPolicy};
use kmsprobe_device::Platform;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// A commit waits on an unsignaled input fence until another thread signals it
pub fn plane_in_fence_blocks<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    setup: &Setup,
) -> VerifyResult<()> {
    let timeline = ctx.create_timeline()?;
    let fence = ctx.create_fence(&timeline, 1)?;
    ctx.stage_in_fence(setup.primary, Some(fence));

    let device = Arc::clone(&ctx.device);
    let timeline_fd = timeline.fd();
    let delay = Duration::from_millis(ctx.config().fence_timeout_ms / 4);
    thread::scope(|s| {
        let signaler = s.spawn(move || {
            thread::sleep(delay);
            debug!(target: "kmsprobe::scenario", timeline = timeline_fd, "signaling input fence");
            device.signal(timeline_fd, 1)
        });
        let committed = ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE);
        let signaled = match signaler.join() {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(KmsError::Other(0).into()),
        };
        committed.and(signaled)
    })
}

/// A commit on a fence nobody signals fails with a timeout and changes nothing
pub fn plane_in_fence_timeout<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    setup: &Setup,
) -> VerifyResult<()> {
    let timeline = ctx.create_timeline()?;
    let fence = ctx.create_fence(&timeline, 1)?;
    ctx.stage_in_fence(setup.primary, Some(fence));
    ctx.commit_expect(CommitStyle::atomic(), Err(KmsError::TimedOut), RelaxPolicy::NONE)?;
    ctx.stage_in_fence(setup.primary, None);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
}
