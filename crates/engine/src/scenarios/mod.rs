//! Verification scenarios
//!
//! Every scenario runs on pipe 0 between [`fixture::atomic_setup`] and
//! [`fixture::atomic_clear`]. The clear runs even when the body failed, so
//! one failing scenario does not poison the next. A body that finds the
//! device lacking a capability ends as [`Outcome::Skipped`].

pub mod coherency;
pub mod damage;
pub mod fence;
pub mod fixture;
pub mod invalid;
pub mod zpos;

use crate::context::KmsContext;
use crate::error::{VerifyError, VerifyResult};
use fixture::{atomic_clear, atomic_setup, Setup};
use kmsprobe_device::Platform;
use std::fmt;
use tracing::{info, warn};

/// Named verification scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    /// Overlay through atomic and legacy
    PlaneOverlayLegacy,
    /// Primary through legacy, universal and atomic
    PlanePrimaryLegacy,
    /// Cursor through atomic and the legacy cursor calls
    PlaneCursorLegacy,
    /// Reordering primary and overlay with mutable zpos
    PlanePrimaryOverlayMutableZpos,
    /// Occlusion in immutable zpos order
    PlaneImmutableZpos,
    /// Test-only checks ahead of real transitions
    TestOnly,
    /// Rejected surface parameters
    PlaneInvalidParams,
    /// Rejected input fences
    PlaneInvalidParamsFence,
    /// Rejected pipeline parameters
    CrtcInvalidParams,
    /// Out-fence and event combinations
    CrtcInvalidParamsFence,
    /// Raw malformed requests
    AtomicInvalidParams,
    /// Damage-clip uploads
    PlaneDamage,
    /// Commit blocks on an input fence
    PlaneInFenceBlocks,
    /// Commit times out on an input fence
    PlaneInFenceTimeout,
}

impl Scenario {
    /// Every scenario in run order
    pub const ALL: &'static [Scenario] = &[
        Scenario::PlaneOverlayLegacy,
        Scenario::PlanePrimaryLegacy,
        Scenario::PlaneCursorLegacy,
        Scenario::PlanePrimaryOverlayMutableZpos,
        Scenario::PlaneImmutableZpos,
        Scenario::TestOnly,
        Scenario::PlaneInvalidParams,
        Scenario::PlaneInvalidParamsFence,
        Scenario::CrtcInvalidParams,
        Scenario::CrtcInvalidParamsFence,
        Scenario::AtomicInvalidParams,
        Scenario::PlaneDamage,
        Scenario::PlaneInFenceBlocks,
        Scenario::PlaneInFenceTimeout,
    ];

    /// Stable kebab-case name
    pub fn name(self) -> &'static str {
        match self {
            Scenario::PlaneOverlayLegacy => "plane-overlay-legacy",
            Scenario::PlanePrimaryLegacy => "plane-primary-legacy",
            Scenario::PlaneCursorLegacy => "plane-cursor-legacy",
            Scenario::PlanePrimaryOverlayMutableZpos => "plane-primary-overlay-mutable-zpos",
            Scenario::PlaneImmutableZpos => "plane-immutable-zpos",
            Scenario::TestOnly => "test-only",
            Scenario::PlaneInvalidParams => "plane-invalid-params",
            Scenario::PlaneInvalidParamsFence => "plane-invalid-params-fence",
            Scenario::CrtcInvalidParams => "crtc-invalid-params",
            Scenario::CrtcInvalidParamsFence => "crtc-invalid-params-fence",
            Scenario::AtomicInvalidParams => "atomic-invalid-params",
            Scenario::PlaneDamage => "plane-damage",
            Scenario::PlaneInFenceBlocks => "plane-in-fence-blocks",
            Scenario::PlaneInFenceTimeout => "plane-in-fence-timeout",
        }
    }

    /// Scenario by name
    pub fn from_name(name: &str) -> Option<Scenario> {
        Scenario::ALL.iter().copied().find(|s| s.name() == name)
    }

    fn body<P: Platform + 'static>(
        self,
        ctx: &mut KmsContext<P>,
        setup: &Setup,
    ) -> VerifyResult<()> {
        match self {
            Scenario::PlaneOverlayLegacy => coherency::plane_overlay_legacy(ctx, setup),
            Scenario::PlanePrimaryLegacy => coherency::plane_primary_legacy(ctx, setup),
            Scenario::PlaneCursorLegacy => coherency::plane_cursor_legacy(ctx, setup),
            Scenario::PlanePrimaryOverlayMutableZpos => {
                coherency::plane_primary_overlay_mutable_zpos(ctx, setup)
            }
            Scenario::PlaneImmutableZpos => zpos::plane_immutable_zpos(ctx, setup),
            Scenario::TestOnly => coherency::test_only(ctx, setup),
            Scenario::PlaneInvalidParams => invalid::plane_invalid_params(ctx, setup),
            Scenario::PlaneInvalidParamsFence => invalid::plane_invalid_params_fence(ctx, setup),
            Scenario::CrtcInvalidParams => invalid::crtc_invalid_params(ctx, setup),
            Scenario::CrtcInvalidParamsFence => invalid::crtc_invalid_params_fence(ctx, setup),
            Scenario::AtomicInvalidParams => ctx.run_probes(setup.pipe).map(|_| ()),
            Scenario::PlaneDamage => damage::plane_damage(ctx, setup),
            Scenario::PlaneInFenceBlocks => fence::plane_in_fence_blocks(ctx, setup),
            Scenario::PlaneInFenceTimeout => fence::plane_in_fence_timeout(ctx, setup),
        }
    }

    /// Set up pipe 0, run the body, clear
    pub fn run<P: Platform + 'static>(self, ctx: &mut KmsContext<P>) -> Outcome {
        info!(target: "kmsprobe::scenario", scenario = self.name(), "starting");
        let outcome = Outcome::from(self.run_inner(ctx));
        match &outcome {
            Outcome::Passed => {
                info!(target: "kmsprobe::scenario", scenario = self.name(), "passed")
            }
            Outcome::Skipped(why) => {
                let scenario = self.name();
                info!(target: "kmsprobe::scenario", scenario, reason = %why, "skipped")
            }
            Outcome::Failed(e) => {
                warn!(target: "kmsprobe::scenario", scenario = self.name(), error = %e, "failed")
            }
        }
        outcome
    }

    fn run_inner<P: Platform + 'static>(self, ctx: &mut KmsContext<P>) -> VerifyResult<()> {
        let pipe = ctx.pipe(0)?;
        let setup = atomic_setup(ctx, pipe)?;
        let body = self.body(ctx, &setup);
        let cleared = atomic_clear(ctx, setup);
        // the body's failure is the interesting one
        body.and(cleared)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one scenario
#[derive(Debug)]
pub enum Outcome {
    /// Every check held
    Passed,
    /// The device lacks a capability the scenario needs
    Skipped(String),
    /// A check failed
    Failed(VerifyError),
}

impl Outcome {
    /// True unless failed
    pub fn is_ok(&self) -> bool {
        !matches!(self, Outcome::Failed(_))
    }
}

impl From<VerifyResult<()>> for Outcome {
    fn from(result: VerifyResult<()>) -> Self {
        match result {
            Ok(()) => Outcome::Passed,
            Err(VerifyError::Unsupported(why)) => Outcome::Skipped(why),
            Err(e) => Outcome::Failed(e),
        }
    }
}

/// Run `scenarios` in order, each on a fresh setup
pub fn run_all<P: Platform + 'static>(
    ctx: &mut KmsContext<P>,
    scenarios: &[Scenario],
) -> Vec<(Scenario, Outcome)> {
    scenarios.iter().map(|s| (*s, s.run(ctx))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeConfig;

    #[test]
    fn test_names_round_trip() {
        for s in Scenario::ALL {
            assert_eq!(Scenario::from_name(s.name()), Some(*s));
        }
        assert_eq!(Scenario::from_name("nope"), None);
    }

    #[test]
    fn test_all_pass_or_skip_on_reference_device() {
        crate::logging::init_for_tests();
        let mut ctx = KmsContext::with_reference_device(ProbeConfig {
            fence_timeout_ms: 200,
            ..Default::default()
        })
        .unwrap();
        for (scenario, outcome) in run_all(&mut ctx, Scenario::ALL) {
            assert!(outcome.is_ok(), "{} failed: {:?}", scenario, outcome);
        }
        assert_eq!(ctx.device().blob_count(), 0);
    }

    #[test]
    fn test_mutable_zpos_is_skipped_by_default() {
        let mut ctx = KmsContext::with_reference_device(ProbeConfig::default()).unwrap();
        let outcome = Scenario::PlanePrimaryOverlayMutableZpos.run(&mut ctx);
        assert!(matches!(outcome, Outcome::Skipped(_)));
    }
}
