//! Layering and partial-update tests
//!
//! Output checksums stand in for a capture of what the pipe scans out.

use super::*;
use kmsprobe::kmsprobe_core::{
    Argb, AtomicFlags, DamageRect, KmsError, PixelFormat, PlaneProperty, RelaxPolicy,
};
use kmsprobe::kmsprobe_device::SimConfig;
use kmsprobe::scenarios::{damage, zpos};
use kmsprobe::{CommitStyle, Outcome, RawPayload, Scenario};

// =============================================================================
// ZPOS
// =============================================================================

/// Immutable zpos values are strictly increasing up the stack
#[test]
fn test_stack_order_is_by_zpos() {
    let ctx = ctx_with_device(SimConfig {
        overlays_per_pipe: 3,
        ..Default::default()
    });
    let pipe = ctx.pipe(0).unwrap();
    let stack = ctx.model().stackable_planes(pipe);
    assert_eq!(stack.len(), 4);
    assert_eq!(stack[0], ctx.model().pipe(pipe).primary());
    let zpos: Vec<u64> = stack
        .iter()
        .map(|p| ctx.get(*p, PlaneProperty::Zpos).unwrap())
        .collect();
    assert!(zpos.windows(2).all(|w| w[0] < w[1]), "{:?}", zpos);
}

/// Immutable zpos is left out of commits and refused when forced in
#[test]
fn test_immutable_zpos_write_is_rejected() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    let overlay = ctx.model().pipe(setup.pipe).overlays()[0];
    let state = ctx.model().plane(overlay).state();
    assert!(state.is_immutable(PlaneProperty::Zpos));
    let prop = state.property_id(PlaneProperty::Zpos).unwrap();
    let id = state.id();

    let current = ctx.get(overlay, PlaneProperty::Zpos).unwrap();
    let before = ctx.capture_baseline().unwrap();
    let payload = RawPayload {
        flags: AtomicFlags::ALLOW_MODESET.bits(),
        ..RawPayload::single(id.0, prop.0, current + 1)
    };
    assert_eq!(ctx.submit_raw(&payload), Err(KmsError::InvalidArgument));
    ctx.verify_unchanged(&before).unwrap();
    clear(&mut ctx, setup);
}

/// An opaque overlay hides what is under it; a hole shows it
#[test]
fn test_overlay_covers_primary() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    let (w, h) = setup.size();
    let full = DamageRect::from_size(0, 0, w, h);
    let primary_only = ctx.checksum(setup.pipe).unwrap();

    let overlay = ctx.model().pipe(setup.pipe).overlays()[0];
    let cover = ctx.alloc_buffer(w, h, PixelFormat::ARGB8888).unwrap();
    ctx.device()
        .fill_rect(cover.fb_id, full, Argb::rgb(0.0, 1.0, 0.0))
        .unwrap();
    ctx.stage_plane(overlay, setup.pipe, &cover, 0, 0);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
        .unwrap();
    let covered = ctx.checksum(setup.pipe).unwrap();
    assert_ne!(covered, primary_only);

    ctx.device().fill_rect(cover.fb_id, full, Argb::TRANSPARENT).unwrap();
    // same framebuffer resubmitted: a full upload
    ctx.stage(overlay, PlaneProperty::FbId, cover.fb_id.value());
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
        .unwrap();
    ctx.expect_checksum(setup.pipe, primary_only, "transparent overlay")
        .unwrap();

    ctx.stage_plane_disabled(overlay);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
        .unwrap();
    ctx.expect_checksum(setup.pipe, primary_only, "overlay removed")
        .unwrap();
    ctx.free_buffer(cover.fb_id).unwrap();
    clear(&mut ctx, setup);
}

/// Immutable zpos occlusion across a chain of overlays
#[test]
fn test_immutable_zpos_chain() {
    let mut ctx = ctx_with_device(SimConfig {
        overlays_per_pipe: 4,
        ..Default::default()
    });
    let setup = lit(&mut ctx);
    zpos::plane_immutable_zpos(&mut ctx, &setup).unwrap();
    clear(&mut ctx, setup);
}

/// Mutable zpos reorders the stack; the scenario passes only when settable
#[test]
fn test_mutable_zpos_scenarios() {
    let mut fixed = reference_ctx();
    assert!(matches!(
        Scenario::PlanePrimaryOverlayMutableZpos.run(&mut fixed),
        Outcome::Skipped(_)
    ));

    let mut mutable = ctx_with_device(SimConfig {
        mutable_zpos: true,
        overlays_per_pipe: 2,
        ..Default::default()
    });
    assert!(matches!(
        Scenario::PlanePrimaryOverlayMutableZpos.run(&mut mutable),
        Outcome::Passed
    ));
    assert_eq!(mutable.device().blob_count(), 0);
}

// =============================================================================
// DAMAGE
// =============================================================================

/// Damage outside what changed leaves the change invisible
#[test]
fn test_damage_limits_upload() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    let before = ctx.checksum(setup.pipe).unwrap();

    ctx.device()
        .fill_rect(
            setup.buffer.fb_id,
            DamageRect::from_size(0, 0, 8, 8),
            Argb::rgb(1.0, 0.0, 1.0),
        )
        .unwrap();
    ctx.stage_damage(setup.primary, &[DamageRect::from_size(64, 64, 8, 8)])
        .unwrap();
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
        .unwrap();
    ctx.expect_checksum(setup.pipe, before, "damage elsewhere")
        .unwrap();

    ctx.stage_damage(setup.primary, &[DamageRect::from_size(0, 0, 8, 8)])
        .unwrap();
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
        .unwrap();
    assert_ne!(ctx.checksum(setup.pipe).unwrap(), before);
    clear(&mut ctx, setup);
}

/// Damage clips are consumed by the commit that carries them
#[test]
fn test_damage_is_per_commit() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    ctx.stage_damage(setup.primary, &[DamageRect::from_size(0, 0, 4, 4)])
        .unwrap();
    assert_ne!(ctx.staged(setup.primary, PlaneProperty::FbDamageClips), 0);
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
        .unwrap();
    assert_eq!(ctx.staged(setup.primary, PlaneProperty::FbDamageClips), 0);
    clear(&mut ctx, setup);
}

/// The damage scenario end to end
#[test]
fn test_damage_scenario() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    damage::plane_damage(&mut ctx, &setup).unwrap();
    clear(&mut ctx, setup);
}

/// Layering scenarios through the runner
#[test]
fn test_layering_scenarios() {
    let mut ctx = ctx_with_device(SimConfig {
        overlays_per_pipe: 2,
        ..Default::default()
    });
    for (scenario, outcome) in kmsprobe::run_all(
        &mut ctx,
        &[Scenario::PlaneImmutableZpos, Scenario::PlaneDamage],
    ) {
        assert!(matches!(outcome, Outcome::Passed), "{}: {:?}", scenario, outcome);
    }
}
