//! Invalid-parameter scenarios
//!
//! Every rejected submission goes through [`KmsContext::commit_expect`], so
//! besides the return code each one also proves that neither query path
//! moved.

use super::fixture::{restore_primary, Setup};
use crate::context::KmsContext;
use crate::driver::CommitStyle;
use crate::error::{VerifyError, VerifyResult};
use crate::model::PipeHandle;
use kmsprobe_core::{
    signed_value, AtomicFlags, CrtcProperty, KmsError, PixelFormat, PlaneProperty, PropertyKind,
    RelaxPolicy,
};
use kmsprobe_device::{FdGuard, Platform, Protection};

const EINVAL: Result<(), KmsError> = Err(KmsError::InvalidArgument);

/// Ids of one object of every kind, for staging into the wrong slot
struct ForeignIds {
    plane: u64,
    crtc: u64,
    output: u64,
    fb: u64,
    mode: u64,
}

fn foreign_ids<P: Platform + 'static>(
    ctx: &KmsContext<P>,
    setup: &Setup,
) -> VerifyResult<ForeignIds> {
    let pipe = ctx.model().pipe(setup.pipe);
    let output = pipe
        .output()
        .ok_or_else(|| VerifyError::unsupported("pipe has no output"))?;
    Ok(ForeignIds {
        plane: ctx.model().plane(setup.primary).id().value(),
        crtc: pipe.id().value(),
        output: ctx.model().output(output).id().value(),
        fb: setup.buffer.fb_id.value(),
        mode: ctx.staged(setup.pipe, CrtcProperty::ModeId),
    })
}

/// Wrong-kind `FB_ID`/`CRTC_ID`, half-enabled surfaces and an undersized buffer
pub fn plane_invalid_params<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    setup: &Setup,
) -> VerifyResult<()> {
    let ids = foreign_ids(ctx, setup)?;
    let primary = setup.primary;
    let atomic = CommitStyle::atomic();

    for bad in [ids.plane, ids.crtc, ids.output, ids.mode] {
        ctx.stage(primary, PlaneProperty::FbId, bad);
        ctx.commit_expect(atomic, EINVAL, RelaxPolicy::NONE)?;
    }
    ctx.stage(primary, PlaneProperty::FbId, 0);
    ctx.commit_expect(atomic, EINVAL, RelaxPolicy::NONE)?;
    ctx.stage(primary, PlaneProperty::FbId, ids.fb);

    for bad in [ids.plane, ids.fb, ids.output, ids.mode] {
        ctx.stage(primary, PlaneProperty::CrtcId, bad);
        ctx.commit_expect(atomic, EINVAL, RelaxPolicy::NONE)?;
    }
    ctx.stage(primary, PlaneProperty::CrtcId, 0);
    ctx.commit_expect(atomic, EINVAL, RelaxPolicy::NONE)?;
    ctx.stage(primary, PlaneProperty::CrtcId, ids.crtc);

    // one column short of the full-screen source crop
    let (w, h) = setup.size();
    let short = ctx.alloc_buffer(w - 1, h, PixelFormat::XRGB8888)?;
    ctx.stage(primary, PlaneProperty::FbId, short.fb_id.value());
    ctx.commit_expect(atomic, Err(KmsError::NoSpace), RelaxPolicy::NONE)?;

    restore_primary(ctx, setup);
    ctx.commit_and_verify(atomic, RelaxPolicy::NONE)?;
    ctx.free_buffer(short.fb_id)
}

/// Input fences that are not sync files, or attached to a rejected request
pub fn plane_invalid_params_fence<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    setup: &Setup,
) -> VerifyResult<()> {
    let primary = setup.primary;
    let atomic = CommitStyle::atomic();
    let timeline = ctx.create_timeline()?;

    // a timeline is a descriptor, but not a fence
    ctx.stage(
        primary,
        PlaneProperty::InFenceFd,
        signed_value(i64::from(timeline.fd())),
    );
    ctx.commit_expect(atomic, EINVAL, RelaxPolicy::NONE)?;

    let fence = ctx.create_fence(&timeline, 1)?;
    ctx.device().signal(timeline.fd(), 1)?;
    let fence_fd = fence.fd();
    ctx.stage_in_fence(primary, Some(fence));
    ctx.stage(primary, PlaneProperty::CrtcId, u64::from(u32::MAX));
    ctx.commit_expect(atomic, EINVAL, RelaxPolicy::NONE)?;
    // the rejected request must not have consumed the staged fence
    if ctx.device().fence_status(fence_fd).is_err() {
        return Err(VerifyError::UnexpectedOutcome {
            context: "in-fence after rejected commit".to_string(),
            expected: 0,
            actual: KmsError::BadDescriptor.code(),
        });
    }

    restore_primary(ctx, setup);
    ctx.commit_and_verify(atomic, RelaxPolicy::NONE)
}

/// Wrong-kind `MODE_ID`, test-only with an event, and mis-sized mode blobs
pub fn crtc_invalid_params<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    setup: &Setup,
) -> VerifyResult<()> {
    let ids = foreign_ids(ctx, setup)?;
    let pipe = setup.pipe;
    let atomic = CommitStyle::atomic();

    for bad in [ids.plane, ids.crtc, ids.output, ids.fb] {
        ctx.stage(pipe, CrtcProperty::ModeId, bad);
        ctx.commit_expect(atomic, EINVAL, RelaxPolicy::NONE)?;
    }
    ctx.stage(pipe, CrtcProperty::ModeId, ids.mode);
    ctx.commit_expect(CommitStyle::test_only(), Ok(()), RelaxPolicy::NONE)?;

    let event_test = CommitStyle::Atomic(
        AtomicFlags::TEST_ONLY | AtomicFlags::ALLOW_MODESET | AtomicFlags::PAGE_FLIP_EVENT,
    );
    ctx.commit_expect(event_test, EINVAL, RelaxPolicy::NONE)?;

    let mut bytes = setup.mode.to_bytes();
    bytes.push(0);
    ctx.stage_blob(pipe, CrtcProperty::ModeId, &bytes)?;
    ctx.commit_expect(atomic, EINVAL, RelaxPolicy::NONE)?;
    bytes.truncate(bytes.len() - 2);
    ctx.stage_blob(pipe, CrtcProperty::ModeId, &bytes)?;
    ctx.commit_expect(atomic, EINVAL, RelaxPolicy::NONE)?;

    ctx.stage_mode(pipe, Some(&setup.mode))?;
    ctx.commit_and_verify(atomic, RelaxPolicy::NONE)
}

fn signaled_fence<P: Platform + 'static>(
    ctx: &KmsContext<P>,
    timeline: &FdGuard,
) -> VerifyResult<FdGuard> {
    let fence = ctx.create_fence(timeline, 1)?;
    ctx.device().signal(timeline.fd(), 1)?;
    Ok(fence)
}

fn expect_slot<P: Platform + 'static>(
    ctx: &KmsContext<P>,
    pipe: PipeHandle,
    want: i32,
) -> VerifyResult<()> {
    match ctx.out_fence_slot(pipe)? {
        Some(got) if got == want => Ok(()),
        got => Err(VerifyError::Mismatch {
            path: crate::error::QueryPath::Atomic,
            object: ctx.model().pipe(pipe).id().object(),
            property: CrtcProperty::OutFencePtr.name(),
            expected: want.to_string(),
            actual: format!("{:?}", got),
        }),
    }
}

/// Out-fence slots the device cannot write, fences without a modeset, and
/// the allowed fence/event combinations
pub fn crtc_invalid_params_fence<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    setup: &Setup,
) -> VerifyResult<()> {
    let pipe = setup.pipe;
    let primary = setup.primary;
    let with_event = CommitStyle::Atomic(AtomicFlags::ALLOW_MODESET | AtomicFlags::PAGE_FLIP_EVENT);
    let timeline = ctx.create_timeline()?;

    for prot in [Protection::READ, Protection::EXEC, Protection::NONE] {
        let addr = ctx.request_out_fence(pipe)?;
        ctx.device().memory().protect(addr, prot)?;
        ctx.commit_expect(with_event, Err(KmsError::Fault), RelaxPolicy::NONE)?;
    }
    ctx.clear_out_fence(pipe);

    // turning the pipe off needs ALLOW_MODESET, whatever else rides along
    let no_modeset = CommitStyle::Atomic(AtomicFlags::empty());
    let event_no_modeset = CommitStyle::Atomic(AtomicFlags::PAGE_FLIP_EVENT);
    ctx.stage(pipe, CrtcProperty::Active, 0);
    let fence = signaled_fence(ctx, &timeline)?;
    ctx.stage_in_fence(primary, Some(fence));
    ctx.commit_expect(no_modeset, EINVAL, RelaxPolicy::NONE)?;
    ctx.stage_in_fence(primary, None);
    ctx.commit_expect(event_no_modeset, EINVAL, RelaxPolicy::NONE)?;
    ctx.request_out_fence(pipe)?;
    ctx.commit_expect(event_no_modeset, EINVAL, RelaxPolicy::NONE)?;
    ctx.clear_out_fence(pipe);
    ctx.stage(pipe, CrtcProperty::Active, 1);

    let mode = ctx.staged(pipe, CrtcProperty::ModeId);
    let not_a_mode = ctx.model().plane(primary).id().value();
    let fence = signaled_fence(ctx, &timeline)?;
    ctx.stage_in_fence(primary, Some(fence));
    ctx.request_out_fence(pipe)?;
    ctx.stage(pipe, CrtcProperty::ModeId, not_a_mode);
    ctx.commit_expect(with_event, EINVAL, RelaxPolicy::NONE)?;
    ctx.stage(pipe, CrtcProperty::ModeId, mode);

    ctx.commit_expect(CommitStyle::test_only(), Ok(()), RelaxPolicy::NONE)?;
    expect_slot(ctx, pipe, -1)?;

    ctx.commit_and_verify(with_event, RelaxPolicy::NONE)?;
    let out = ctx
        .take_out_fence(pipe)
        .ok_or_else(|| VerifyError::UnexpectedOutcome {
            context: "out-fence after commit".to_string(),
            expected: 0,
            actual: -1,
        })?;
    if !ctx.device().fence_status(out.fd())? {
        return Err(VerifyError::UnexpectedOutcome {
            context: "out-fence of a completed commit".to_string(),
            expected: 1,
            actual: 0,
        });
    }
    if ctx.take_events().is_empty() {
        return Err(VerifyError::UnexpectedOutcome {
            context: "flip events after commit".to_string(),
            expected: 1,
            actual: 0,
        });
    }

    // an out-fence needs an event to go with it
    ctx.request_out_fence(pipe)?;
    ctx.commit_expect(CommitStyle::atomic(), EINVAL, RelaxPolicy::NONE)?;
    ctx.clear_out_fence(pipe);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
}
