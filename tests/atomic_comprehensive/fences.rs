//! Fence and event tests
//!
//! Input fences gate a commit, output fences report its completion, and
//! neither may leak a descriptor whatever the commit's outcome.

use super::*;
use kmsprobe::kmsprobe_core::{AtomicFlags, CrtcProperty, KmsError, PlaneProperty, RelaxPolicy};
use kmsprobe::scenarios::fence;
use kmsprobe::{CommitStyle, Outcome, Scenario};
use std::time::{Duration, Instant};

fn with_event() -> CommitStyle {
    CommitStyle::Atomic(AtomicFlags::ALLOW_MODESET | AtomicFlags::PAGE_FLIP_EVENT)
}

// =============================================================================
// INPUT FENCES
// =============================================================================

/// An already signaled fence lets the commit through at once
#[test]
fn test_signaled_in_fence() {
    let mut ctx = fast_fence_ctx();
    let setup = lit(&mut ctx);
    let timeline = ctx.create_timeline().unwrap();
    let fence = ctx.create_fence(&timeline, 1).unwrap();
    ctx.device().signal(timeline.fd(), 1).unwrap();
    ctx.stage_in_fence(setup.primary, Some(fence));

    let started = Instant::now();
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(150));
    assert_eq!(
        ctx.staged(setup.primary, PlaneProperty::InFenceFd),
        kmsprobe::kmsprobe_core::NO_FENCE
    );
    drop(timeline);
    clear(&mut ctx, setup);
    assert_eq!(ctx.device().open_fd_count(), 0);
}

/// The commit waits for another thread to signal
#[test]
fn test_in_fence_blocks_then_commits() {
    let mut ctx = fast_fence_ctx();
    let setup = lit(&mut ctx);
    let started = Instant::now();
    fence::plane_in_fence_blocks(&mut ctx, &setup).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(30));
    clear(&mut ctx, setup);
    assert_eq!(ctx.device().open_fd_count(), 0);
}

/// Nobody signals: the commit times out and nothing moves
#[test]
fn test_in_fence_times_out() {
    let mut ctx = fast_fence_ctx();
    let setup = lit(&mut ctx);
    let started = Instant::now();
    fence::plane_in_fence_timeout(&mut ctx, &setup).unwrap();
    assert!(started.elapsed() >= Duration::from_millis(150));
    clear(&mut ctx, setup);
    assert_eq!(ctx.device().open_fd_count(), 0);
}

/// A fence that signaled a later point than asked for still counts
#[test]
fn test_timeline_past_fence_point() {
    let mut ctx = fast_fence_ctx();
    let setup = lit(&mut ctx);
    let timeline = ctx.create_timeline().unwrap();
    let fence = ctx.create_fence(&timeline, 2).unwrap();
    ctx.device().signal(timeline.fd(), 3).unwrap();
    assert!(ctx.device().fence_status(fence.fd()).unwrap());
    ctx.stage_in_fence(setup.primary, Some(fence));
    ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
        .unwrap();
    drop(timeline);
    clear(&mut ctx, setup);
}

/// Closing the timeline releases whoever waits on it
#[test]
fn test_closed_timeline_signals() {
    let mut ctx = fast_fence_ctx();
    let setup = lit(&mut ctx);
    let timeline = ctx.create_timeline().unwrap();
    let fence = ctx.create_fence(&timeline, 1).unwrap();
    assert!(!ctx.device().fence_status(fence.fd()).unwrap());
    drop(timeline);
    assert!(ctx.device().fence_status(fence.fd()).unwrap());
    drop(fence);
    clear(&mut ctx, setup);
    assert_eq!(ctx.device().open_fd_count(), 0);
}

// =============================================================================
// OUTPUT FENCES AND EVENTS
// =============================================================================

/// Every commit with an event reports one flip per affected pipe
#[test]
fn test_flip_event_per_commit() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    ctx.take_events();
    for round in 1..=3u32 {
        kmsprobe::scenarios::fixture::restore_primary(&mut ctx, &setup);
        ctx.commit_and_verify(with_event(), RelaxPolicy::NONE)
            .unwrap();
        let events = ctx.take_events();
        assert_eq!(events.len(), 1, "round {}", round);
        assert_eq!(events[0].crtc_id, ctx.model().pipe(setup.pipe).id());
    }
    clear(&mut ctx, setup);
}

/// A successful commit hands back a signaled out-fence and resets the slot
#[test]
fn test_out_fence_after_commit() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    ctx.request_out_fence(setup.pipe).unwrap();
    assert!(ctx.out_fence_slot(setup.pipe).unwrap().is_some());

    ctx.commit_and_verify(with_event(), RelaxPolicy::NONE)
        .unwrap();
    assert_eq!(ctx.staged(setup.pipe, CrtcProperty::OutFencePtr), 0);
    let out = ctx.take_out_fence(setup.pipe).unwrap();
    assert!(ctx.device().fence_status(out.fd()).unwrap());
    assert_eq!(ctx.device().open_fd_count(), 1);
    drop(out);
    assert_eq!(ctx.device().open_fd_count(), 0);
    assert_eq!(ctx.take_events().len(), 1);
    clear(&mut ctx, setup);
}

/// Test-only probes the slot with -1 but creates no fence
#[test]
fn test_out_fence_test_only() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    ctx.request_out_fence(setup.pipe).unwrap();
    ctx.commit_expect(CommitStyle::test_only(), Ok(()), RelaxPolicy::NONE)
        .unwrap();
    assert_eq!(ctx.out_fence_slot(setup.pipe).unwrap(), Some(-1));
    assert!(ctx.take_out_fence(setup.pipe).is_none());
    assert_eq!(ctx.device().open_fd_count(), 0);
    ctx.clear_out_fence(setup.pipe);
    clear(&mut ctx, setup);
}

/// An out-fence without an event is rejected on a real commit
#[test]
fn test_out_fence_needs_event() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    ctx.request_out_fence(setup.pipe).unwrap();
    ctx.commit_expect(
        CommitStyle::atomic(),
        Err(KmsError::InvalidArgument),
        RelaxPolicy::NONE,
    )
    .unwrap();
    ctx.clear_out_fence(setup.pipe);
    assert_eq!(ctx.device().memory().mapping_count(), 0);
    clear(&mut ctx, setup);
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn test_fence_scenarios() {
    let mut ctx = fast_fence_ctx();
    for scenario in [
        Scenario::PlaneInFenceBlocks,
        Scenario::PlaneInFenceTimeout,
        Scenario::PlaneInvalidParamsFence,
        Scenario::CrtcInvalidParamsFence,
    ] {
        match scenario.run(&mut ctx) {
            Outcome::Passed => {}
            other => panic!("{}: {:?}", scenario, other),
        }
    }
    assert_eq!(ctx.device().open_fd_count(), 0);
}
