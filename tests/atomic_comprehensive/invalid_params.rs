//! Invalid parameter tests
//!
//! Rejections must carry the exact error class and leave both query paths
//! where they were.

use super::*;
use kmsprobe::kmsprobe_core::{
    to_fixed, AtomicFlags, CrtcProperty, KmsError, PixelFormat, PlaneProperty, RelaxPolicy,
};
use kmsprobe::kmsprobe_device::SimConfig;
use kmsprobe::{CommitStyle, Outcome, Scenario};

fn einval() -> Result<(), KmsError> {
    Err(KmsError::InvalidArgument)
}

// =============================================================================
// SURFACES
// =============================================================================

/// A surface on a pipe from outside its possible set is rejected
#[test]
fn test_plane_on_foreign_pipe() {
    let mut ctx = ctx_with_device(SimConfig {
        pipes: 2,
        ..Default::default()
    });
    let setup = lit(&mut ctx);
    let other = ctx.pipe(1).unwrap();
    let crtc = ctx.model().pipe(other).id().value();
    ctx.stage(setup.primary, PlaneProperty::CrtcId, crtc);
    ctx.commit_expect(CommitStyle::atomic(), einval(), RelaxPolicy::NONE)
        .unwrap();
    kmsprobe::scenarios::fixture::restore_primary(&mut ctx, &setup);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
        .unwrap();
    clear(&mut ctx, setup);
}

/// A format the surface does not list is rejected
#[test]
fn test_unsupported_format() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    let (w, h) = setup.size();
    assert!(!ctx
        .model()
        .plane(setup.primary)
        .formats()
        .contains(&PixelFormat::ARGB1555));
    let buf = ctx.alloc_buffer(w, h, PixelFormat::ARGB1555).unwrap();
    ctx.stage_plane(setup.primary, setup.pipe, &buf, 0, 0);
    ctx.commit_expect(CommitStyle::atomic(), einval(), RelaxPolicy::NONE)
        .unwrap();
    kmsprobe::scenarios::fixture::restore_primary(&mut ctx, &setup);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
        .unwrap();
    ctx.free_buffer(buf.fb_id).unwrap();
    clear(&mut ctx, setup);
}

/// Scaling is out of range and an empty source is invalid
#[test]
fn test_plane_geometry() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    let (w, _) = setup.size();

    ctx.stage(setup.primary, PlaneProperty::CrtcW, u64::from(w / 2));
    ctx.commit_expect(
        CommitStyle::atomic(),
        Err(KmsError::OutOfRange),
        RelaxPolicy::NONE,
    )
    .unwrap();

    ctx.stage(setup.primary, PlaneProperty::CrtcW, u64::from(w));
    ctx.stage(setup.primary, PlaneProperty::SrcW, 0);
    ctx.commit_expect(CommitStyle::atomic(), einval(), RelaxPolicy::NONE)
        .unwrap();

    ctx.stage(setup.primary, PlaneProperty::SrcW, to_fixed(w));
    ctx.stage(setup.primary, PlaneProperty::SrcX, to_fixed(1));
    ctx.commit_expect(
        CommitStyle::atomic(),
        Err(KmsError::NoSpace),
        RelaxPolicy::NONE,
    )
    .unwrap();

    kmsprobe::scenarios::fixture::restore_primary(&mut ctx, &setup);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
        .unwrap();
    clear(&mut ctx, setup);
}

/// A cursor past the size cap is rejected
#[test]
fn test_oversized_cursor() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    let cursor = ctx.model().pipe(setup.pipe).cursor().unwrap();
    let (max_w, _) = ctx.device().cursor_size_cap();
    let buf = ctx
        .alloc_buffer(max_w * 2, max_w * 2, PixelFormat::ARGB8888)
        .unwrap();
    ctx.stage_plane(cursor, setup.pipe, &buf, 0, 0);
    ctx.commit_expect(CommitStyle::atomic(), einval(), RelaxPolicy::NONE)
        .unwrap();
    ctx.stage_plane_disabled(cursor);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
        .unwrap();
    ctx.free_buffer(buf.fb_id).unwrap();
    clear(&mut ctx, setup);
}

// =============================================================================
// PIPELINES
// =============================================================================

/// A mode change without ALLOW_MODESET is rejected
#[test]
fn test_modeset_needs_flag() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    ctx.stage(setup.pipe, CrtcProperty::Active, 0);
    ctx.commit_expect(
        CommitStyle::Atomic(AtomicFlags::empty()),
        einval(),
        RelaxPolicy::NONE,
    )
    .unwrap();
    ctx.stage(setup.pipe, CrtcProperty::Active, 1);
    clear(&mut ctx, setup);
}

/// A page flip event on a dark pipe has nothing to complete
#[test]
fn test_event_on_dark_pipe() {
    let mut ctx = reference_ctx();
    let pipe = ctx.pipe(0).unwrap();
    ctx.stage(pipe, CrtcProperty::Active, 0);
    ctx.commit_expect(
        CommitStyle::Atomic(AtomicFlags::ALLOW_MODESET | AtomicFlags::PAGE_FLIP_EVENT),
        einval(),
        RelaxPolicy::NONE,
    )
    .unwrap();
}

/// Asynchronous flips are refused outright
#[test]
fn test_async_flip_is_refused() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    ctx.commit_expect(
        CommitStyle::Atomic(AtomicFlags::PAGE_FLIP_ASYNC | AtomicFlags::PAGE_FLIP_EVENT),
        einval(),
        RelaxPolicy::NONE,
    )
    .unwrap();
    clear(&mut ctx, setup);
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn test_invalid_param_scenarios() {
    let mut ctx = fast_fence_ctx();
    for scenario in [
        Scenario::PlaneInvalidParams,
        Scenario::PlaneInvalidParamsFence,
        Scenario::CrtcInvalidParams,
        Scenario::CrtcInvalidParamsFence,
        Scenario::AtomicInvalidParams,
    ] {
        match scenario.run(&mut ctx) {
            Outcome::Passed => {}
            other => panic!("{}: {:?}", scenario, other),
        }
    }
    assert_eq!(ctx.device().open_fd_count(), 0);
    assert_eq!(ctx.device().blob_count(), 0);
    assert_eq!(ctx.device().memory().mapping_count(), 0);
}
