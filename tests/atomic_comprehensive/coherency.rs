//! Cross-path coherency tests
//!
//! After every successful commit, whatever the style, the atomic property
//! query and the legacy per-object queries must both report the staged
//! state. Tests here drive the engine directly as well as through the
//! named scenarios.

use super::*;
use kmsprobe::kmsprobe_core::{
    ConnectorProperty, CrtcProperty, KmsError, PixelFormat, PlaneProperty, RelaxPolicy,
};
use kmsprobe::kmsprobe_device::SimConfig;
use kmsprobe::{CommitStyle, Outcome, Scenario, VerifyError};

// =============================================================================
// STAGING AND COMMIT
// =============================================================================

/// Staging alone never reaches the device
#[test]
fn test_staging_does_not_touch_device() {
    let mut ctx = reference_ctx();
    let pipe = ctx.pipe(0).unwrap();
    let mode = ctx.preferred_mode(pipe).unwrap();
    ctx.stage_pipe_enabled(pipe, &mode).unwrap();

    assert_eq!(ctx.get(pipe, CrtcProperty::Active).unwrap(), 0);
    assert_eq!(ctx.get(pipe, CrtcProperty::ModeId).unwrap(), 0);
    assert_eq!(ctx.staged(pipe, CrtcProperty::Active), 1);
}

/// A lit pipe reads back the same through both paths
#[test]
fn test_setup_is_coherent() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);

    ctx.verify_staged(RelaxPolicy::NONE).unwrap();
    let view = ctx.legacy_pipe(setup.pipe).unwrap();
    assert_eq!(view.mode, Some(setup.mode));
    assert_eq!(view.buffer_id, setup.buffer.fb_id);
    assert_eq!((view.x, view.y), (0, 0));

    let output = ctx.model().pipe(setup.pipe).output().unwrap();
    assert_eq!(
        ctx.get(output, ConnectorProperty::CrtcId).unwrap(),
        ctx.model().pipe(setup.pipe).id().value()
    );
    clear(&mut ctx, setup);
}

/// Moving the source crop shows up as the legacy x/y
#[test]
fn test_legacy_position_follows_source_crop() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    let (w, h) = setup.size();
    let big = ctx.alloc_buffer(w + 32, h + 16, PixelFormat::XRGB8888).unwrap();
    let crtc = ctx.model().pipe(setup.pipe).id();
    ctx.stage_plane_region(
        setup.primary,
        crtc,
        big.fb_id,
        kmsprobe::kmsprobe_core::DamageRect::from_size(32, 16, w, h),
        0,
        0,
    );
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
        .unwrap();

    let view = ctx.legacy_pipe(setup.pipe).unwrap();
    assert_eq!((view.x, view.y), (32, 16));
    assert_eq!(view.buffer_id, big.fb_id);

    kmsprobe::scenarios::fixture::restore_primary(&mut ctx, &setup);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
        .unwrap();
    ctx.free_buffer(big.fb_id).unwrap();
    clear(&mut ctx, setup);
}

/// A disabled primary leaves the legacy pipe with no buffer but a mode
#[test]
fn test_primary_off_keeps_mode() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    ctx.stage_plane_disabled(setup.primary);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
        .unwrap();

    let view = ctx.legacy_pipe(setup.pipe).unwrap();
    assert!(view.mode.is_some());
    assert!(view.buffer_id.is_none());
    clear(&mut ctx, setup);
}

/// Universal commits leave pipeline state staged
#[test]
fn test_universal_does_not_submit_pipe() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    ctx.stage(setup.pipe, CrtcProperty::Active, 0);
    let overlay = ctx.model().pipe(setup.pipe).overlays()[0];
    let buf = ctx.alloc_buffer(32, 32, PixelFormat::XRGB8888).unwrap();
    ctx.stage_plane(overlay, setup.pipe, &buf, 0, 0);

    ctx.try_commit(CommitStyle::Universal).unwrap();
    assert_eq!(ctx.get(setup.pipe, CrtcProperty::Active).unwrap(), 1);
    assert_eq!(ctx.get(overlay, PlaneProperty::FbId).unwrap(), buf.fb_id.value());
    // the pipe is still touched and still staged off
    assert!(ctx.verify_staged(RelaxPolicy::NONE).is_err());

    ctx.stage(setup.pipe, CrtcProperty::Active, 1);
    ctx.stage_plane_disabled(overlay);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
        .unwrap();
    ctx.free_buffer(buf.fb_id).unwrap();
    clear(&mut ctx, setup);
}

/// A legacy modeset verifies under the legacy relaxation
#[test]
fn test_legacy_modeset_verifies_relaxed() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    ctx.stage_plane_disabled(setup.primary);
    ctx.stage_pipe_disabled(setup.pipe).unwrap();
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
        .unwrap();

    ctx.stage_pipe_enabled(setup.pipe, &setup.mode).unwrap();
    kmsprobe::scenarios::fixture::restore_primary(&mut ctx, &setup);
    ctx.try_commit(CommitStyle::Legacy).unwrap();
    ctx.verify_staged(CommitStyle::Legacy.relaxation()).unwrap();
    assert!(ctx.legacy_pipe(setup.pipe).unwrap().mode.is_some());
    clear(&mut ctx, setup);
}

// =============================================================================
// ATOMICITY
// =============================================================================

/// FB_ID=B with CRTC_ID=0 while the surface is on a pipe is rejected and
/// leaves every snapshot identical
#[test]
fn test_half_detached_surface_changes_nothing() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    let other = ctx.alloc_buffer(64, 64, PixelFormat::XRGB8888).unwrap();
    let before = ctx.capture_baseline().unwrap();

    ctx.stage(setup.primary, PlaneProperty::FbId, other.fb_id.value());
    ctx.stage(setup.primary, PlaneProperty::CrtcId, 0);
    assert_eq!(
        ctx.try_commit(CommitStyle::atomic()),
        Err(KmsError::InvalidArgument)
    );
    ctx.verify_unchanged(&before).unwrap();
    assert_eq!(
        before.plane(setup.primary).unwrap().get(PlaneProperty::FbId),
        Some(setup.buffer.fb_id.value())
    );

    kmsprobe::scenarios::fixture::restore_primary(&mut ctx, &setup);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
        .unwrap();
    ctx.free_buffer(other.fb_id).unwrap();
    clear(&mut ctx, setup);
}

/// Rejected commits keep the staged state for a later retry
#[test]
fn test_rejected_commit_keeps_staging() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    ctx.stage(setup.primary, PlaneProperty::CrtcW, 17);
    assert_eq!(ctx.try_commit(CommitStyle::atomic()), Err(KmsError::OutOfRange));
    assert_eq!(ctx.staged(setup.primary, PlaneProperty::CrtcW), 17);
    assert!(ctx.model().plane(setup.primary).state().is_touched());

    kmsprobe::scenarios::fixture::restore_primary(&mut ctx, &setup);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
        .unwrap();
    assert!(!ctx.model().plane(setup.primary).state().is_touched());
    clear(&mut ctx, setup);
}

/// Test-only submissions are repeatable and invisible
#[test]
fn test_test_only_is_idempotent() {
    let mut ctx = ctx_with(kmsprobe::ProbeConfig {
        test_only_repeats: 5,
        ..Default::default()
    });
    let setup = lit(&mut ctx);
    ctx.stage_pipe_disabled(setup.pipe).unwrap();
    assert_eq!(ctx.verify_test_only().unwrap(), Err(KmsError::InvalidArgument));
    ctx.stage_plane_disabled(setup.primary);
    assert_eq!(ctx.verify_test_only().unwrap(), Ok(()));
    assert_eq!(ctx.get(setup.pipe, CrtcProperty::Active).unwrap(), 1);
    clear(&mut ctx, setup);
}

// =============================================================================
// SCENARIOS
// =============================================================================

fn expect_passed(scenario: Scenario, device: SimConfig) {
    let mut ctx = ctx_with_device(device);
    match scenario.run(&mut ctx) {
        Outcome::Passed => {}
        other => panic!("{} did not pass: {:?}", scenario, other),
    }
    assert_eq!(ctx.device().blob_count(), 0);
}

#[test]
fn test_overlay_legacy_scenario() {
    expect_passed(Scenario::PlaneOverlayLegacy, SimConfig::default());
}

#[test]
fn test_primary_legacy_scenario() {
    expect_passed(Scenario::PlanePrimaryLegacy, SimConfig::default());
}

#[test]
fn test_cursor_legacy_scenario() {
    expect_passed(Scenario::PlaneCursorLegacy, SimConfig::default());
}

#[test]
fn test_test_only_scenario() {
    expect_passed(Scenario::TestOnly, SimConfig::default());
}

#[test]
fn test_mutable_zpos_scenario() {
    expect_passed(
        Scenario::PlanePrimaryOverlayMutableZpos,
        SimConfig {
            mutable_zpos: true,
            ..Default::default()
        },
    );
}

/// Without a cursor plane the cursor scenario is skipped, not failed
#[test]
fn test_cursor_scenario_skips_without_cursor() {
    let mut ctx = ctx_with_device(SimConfig {
        cursor: false,
        ..Default::default()
    });
    assert!(matches!(
        Scenario::PlaneCursorLegacy.run(&mut ctx),
        Outcome::Skipped(_)
    ));
}

/// Scenarios run on any pipe count; only pipe 0 is lit
#[test]
fn test_scenarios_with_several_pipes() {
    let mut ctx = ctx_with_device(SimConfig {
        pipes: 3,
        overlays_per_pipe: 2,
        ..Default::default()
    });
    for scenario in [Scenario::PlaneOverlayLegacy, Scenario::TestOnly] {
        let outcome = scenario.run(&mut ctx);
        assert!(outcome.is_ok(), "{}: {:?}", scenario, outcome);
    }
    for pipe in ctx.model().pipe_handles() {
        assert_eq!(ctx.get(pipe, CrtcProperty::Active).unwrap(), 0);
    }
}

/// A missing pipe is a skip through `pipe`, not a panic
#[test]
fn test_pipe_out_of_range_is_unsupported() {
    let ctx = reference_ctx();
    assert!(matches!(ctx.pipe(4), Err(VerifyError::Unsupported(_))));
}
