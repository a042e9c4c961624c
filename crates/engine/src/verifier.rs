//! Consistency verifier
//!
//! Commit-and-verify takes baseline atomic and legacy views of every
//! object, submits the staged state, then checks one of two things:
//!
//! - on success, both query paths agree with the staged values, modulo the
//!   caller's relaxation
//! - on an expected failure (or a test-only success), both baseline views
//!   are unchanged
//!
//! A submission whose outcome differs from the expected one is an error in
//! itself; nothing is retried and nothing is swallowed.

use crate::context::KmsContext;
use crate::driver::CommitStyle;
use crate::error::{VerifyError, VerifyResult};
use crate::legacy::{LegacyPipeView, LegacyPlaneView};
use crate::model::{OutputHandle, PipeHandle, PlaneHandle};
use crate::snapshot::Snapshot;
use kmsprobe_core::{
    return_code, ConnectorProperty, CrtcProperty, KmsResult, PlaneProperty, RelaxPolicy,
};
use kmsprobe_device::Platform;
use tracing::{debug, warn};

/// Atomic and legacy views of every object, taken before a submission
#[derive(Debug, Clone)]
pub struct StateBaseline {
    pipes: Vec<(PipeHandle, Snapshot<CrtcProperty>, LegacyPipeView)>,
    planes: Vec<(PlaneHandle, Snapshot<PlaneProperty>, LegacyPlaneView)>,
    outputs: Vec<(OutputHandle, Snapshot<ConnectorProperty>)>,
}

impl StateBaseline {
    /// Atomic snapshot of a pipeline at baseline time
    pub fn pipe(&self, pipe: PipeHandle) -> Option<&Snapshot<CrtcProperty>> {
        self.pipes.iter().find(|(h, _, _)| *h == pipe).map(|(_, s, _)| s)
    }

    /// Atomic snapshot of a surface at baseline time
    pub fn plane(&self, plane: PlaneHandle) -> Option<&Snapshot<PlaneProperty>> {
        self.planes.iter().find(|(h, _, _)| *h == plane).map(|(_, s, _)| s)
    }
}

impl<P: Platform + 'static> KmsContext<P> {
    /// Capture atomic and legacy views of every object
    pub fn capture_baseline(&self) -> VerifyResult<StateBaseline> {
        let mut baseline = StateBaseline {
            pipes: Vec::new(),
            planes: Vec::new(),
            outputs: Vec::new(),
        };
        for pipe in self.model.pipe_handles() {
            baseline
                .pipes
                .push((pipe, self.capture(pipe)?, self.legacy_pipe(pipe)?));
        }
        for plane in self.model.plane_handles() {
            baseline
                .planes
                .push((plane, self.capture(plane)?, self.legacy_plane(plane)?));
        }
        for output in self.model.output_handles() {
            baseline.outputs.push((output, self.capture(output)?));
        }
        Ok(baseline)
    }

    /// Both query paths still report the baseline
    pub fn verify_unchanged(&self, baseline: &StateBaseline) -> VerifyResult<()> {
        let dev = &*self.device;
        for (pipe, snap, legacy) in &baseline.pipes {
            self.capture(*pipe)?.check_against(snap, RelaxPolicy::NONE, dev)?;
            self.legacy_pipe(*pipe)?.check_against(legacy, snap.object())?;
        }
        for (plane, snap, legacy) in &baseline.planes {
            self.capture(*plane)?.check_against(snap, RelaxPolicy::NONE, dev)?;
            self.legacy_plane(*plane)?
                .check_against(legacy, snap.object(), RelaxPolicy::NONE)?;
        }
        for (output, snap) in &baseline.outputs {
            self.capture(*output)?.check_against(snap, RelaxPolicy::NONE, dev)?;
        }
        Ok(())
    }

    /// Both query paths agree with the staged state under `relax`
    pub fn verify_staged(&self, relax: RelaxPolicy) -> VerifyResult<()> {
        let dev = &*self.device;
        for pipe in self.model.pipe_handles() {
            self.capture(pipe)?
                .check_against(&self.staged_snapshot(pipe), relax, dev)?;
            self.verify_legacy_pipe(pipe)?;
        }
        for plane in self.model.plane_handles() {
            self.capture(plane)?
                .check_against(&self.staged_snapshot(plane), relax, dev)?;
            self.verify_legacy_plane(plane, relax)?;
        }
        for output in self.model.output_handles() {
            self.capture(output)?
                .check_against(&self.staged_snapshot(output), relax, dev)?;
        }
        Ok(())
    }

    /// Submit and require `expected`, then verify the matching invariant
    pub fn commit_expect(
        &mut self,
        style: CommitStyle,
        expected: KmsResult<()>,
        relax: RelaxPolicy,
    ) -> VerifyResult<()> {
        let baseline = self.capture_baseline()?;
        let result = self.try_commit(style);
        if result != expected {
            warn!(
                target: "kmsprobe::verify",
                %style,
                expected = return_code(&expected),
                actual = return_code(&result),
                "unexpected commit outcome"
            );
            return Err(VerifyError::UnexpectedOutcome {
                context: format!("{} commit", style),
                expected: return_code(&expected),
                actual: return_code(&result),
            });
        }
        match result {
            Ok(()) if !style.is_test_only() => self.verify_staged(relax),
            _ => self.verify_unchanged(&baseline),
        }?;
        debug!(target: "kmsprobe::verify", %style, code = return_code(&result), "commit verified");
        Ok(())
    }

    /// Submit, require success and verify both query paths
    pub fn commit_and_verify(
        &mut self,
        style: CommitStyle,
        relax: RelaxPolicy,
    ) -> VerifyResult<()> {
        self.commit_expect(style, Ok(()), relax)
    }

    /// Submit the staged state test-only `test_only_repeats` times
    ///
    /// Every attempt must return the same result and leave both query paths
    /// at the baseline. Returns that result.
    pub fn verify_test_only(&mut self) -> VerifyResult<KmsResult<()>> {
        let baseline = self.capture_baseline()?;
        let first = self.try_commit(CommitStyle::test_only());
        self.verify_unchanged(&baseline)?;
        for attempt in 1..self.config.test_only_repeats {
            let result = self.try_commit(CommitStyle::test_only());
            if result != first {
                return Err(VerifyError::NotIdempotent {
                    attempt,
                    first: return_code(&first),
                    actual: return_code(&result),
                });
            }
            self.verify_unchanged(&baseline)?;
        }
        Ok(first)
    }

    /// Output checksum of a pipeline
    pub fn checksum(&self, pipe: PipeHandle) -> VerifyResult<u32> {
        Ok(self
            .device
            .read_output_checksum(self.model.pipe(pipe).id())?)
    }

    /// Output checksum of a pipeline equals `reference`
    pub fn expect_checksum(
        &self,
        pipe: PipeHandle,
        reference: u32,
        context: &str,
    ) -> VerifyResult<()> {
        let actual = self.checksum(pipe)?;
        if actual != reference {
            warn!(target: "kmsprobe::verify", context, reference, actual, "checksum mismatch");
            return Err(VerifyError::ChecksumMismatch {
                context: context.to_string(),
                expected: reference,
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeConfig;
    use kmsprobe_core::{KmsError, PixelFormat};
    use kmsprobe_device::SimDevice;

    fn staged_enable() -> (KmsContext<SimDevice>, PipeHandle) {
        let mut ctx = KmsContext::with_reference_device(ProbeConfig::default()).unwrap();
        let pipe = PipeHandle(0);
        let mode = ctx.preferred_mode(pipe).unwrap();
        let buf = ctx
            .alloc_buffer(u32::from(mode.hdisplay), u32::from(mode.vdisplay), PixelFormat::XRGB8888)
            .unwrap();
        ctx.stage_pipe_enabled(pipe, &mode).unwrap();
        let primary = ctx.model().pipe(pipe).primary();
        ctx.stage_plane(primary, pipe, &buf, 0, 0);
        (ctx, pipe)
    }

    #[test]
    fn test_commit_and_verify_enable() {
        let (mut ctx, pipe) = staged_enable();
        ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
            .unwrap();
        assert_eq!(ctx.get(pipe, CrtcProperty::Active).unwrap(), 1);
    }

    #[test]
    fn test_rejected_commit_leaves_baseline() {
        let (mut ctx, pipe) = staged_enable();
        ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
            .unwrap();
        let primary = ctx.model().pipe(pipe).primary();
        let fb = ctx.staged(primary, PlaneProperty::FbId);
        ctx.stage(primary, PlaneProperty::CrtcId, 0);
        ctx.commit_expect(
            CommitStyle::atomic(),
            Err(KmsError::InvalidArgument),
            RelaxPolicy::NONE,
        )
        .unwrap();
        assert_eq!(ctx.get(primary, PlaneProperty::FbId).unwrap(), fb);
    }

    #[test]
    fn test_wrong_outcome_is_reported() {
        let (mut ctx, _) = staged_enable();
        let err = ctx
            .commit_expect(
                CommitStyle::atomic(),
                Err(KmsError::InvalidArgument),
                RelaxPolicy::NONE,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::UnexpectedOutcome {
                expected: -22,
                actual: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_test_only_is_idempotent() {
        let (mut ctx, pipe) = staged_enable();
        assert_eq!(ctx.verify_test_only().unwrap(), Ok(()));
        assert_eq!(ctx.get(pipe, CrtcProperty::Active).unwrap(), 0);
        ctx.stage(pipe, CrtcProperty::ModeId, 0);
        assert_eq!(ctx.verify_test_only().unwrap(), Err(KmsError::InvalidArgument));
    }

    #[test]
    fn test_checksum_requires_active_pipe() {
        let (mut ctx, pipe) = staged_enable();
        assert!(ctx.checksum(pipe).is_err());
        ctx.commit_and_verify(CommitStyle::atomic(), RelaxPolicy::NONE)
            .unwrap();
        let reference = ctx.checksum(pipe).unwrap();
        ctx.expect_checksum(pipe, reference, "stable").unwrap();
        assert!(matches!(
            ctx.expect_checksum(pipe, reference ^ 1, "moved"),
            Err(VerifyError::ChecksumMismatch { .. })
        ));
    }
}
