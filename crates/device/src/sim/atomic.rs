//! Atomic transaction ioctl
//!
//! Processing order:
//!
//! 1. flag and reserved-field validation
//! 2. copy-in of the four arrays, applying each property to a candidate state
//! 3. signaling setup: out-fence slots are probed with -1, event and fence
//!    combinations are checked
//! 4. whole-state check
//! 5. `TEST_ONLY` stops here
//! 6. wait for input fences, create out-fences, swap the state, queue events
//!
//! A failure at any step leaves the committed state untouched.

use super::fence::{FencePoint, FenceTable};
use super::state::DisplayState;
use super::SimDevice;
use crate::traits::FlipEvent;
use kmsprobe_core::{
    AtomicFlags, AtomicRequest, CrtcId, KmsError, KmsResult, ObjectId, ObjectKind, PlaneId,
    PropertyId,
};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Address of element `index` of an array of `size`-byte elements
fn element(base: u64, index: u64, size: u64) -> KmsResult<u64> {
    index
        .checked_mul(size)
        .and_then(|offset| base.checked_add(offset))
        .ok_or(KmsError::Fault)
}

/// Close out-fences created for a commit that is being unwound
fn discard_out_fences(fences: &mut FenceTable, created: Vec<i32>) {
    for fd in created {
        if let Err(e) = fences.close(fd) {
            warn!(target: "kmsprobe::device", fd, error = %e, "out-fence close failed");
        }
    }
}

#[derive(Debug, Default)]
struct Touched {
    planes: BTreeSet<PlaneId>,
    crtcs: BTreeSet<CrtcId>,
    connectors: BTreeSet<ObjectId>,
}

impl Touched {
    /// Pipelines whose output the transaction can change, old and new
    fn affected_crtcs(&self, old: &DisplayState, new: &DisplayState) -> BTreeSet<CrtcId> {
        let mut out = self.crtcs.clone();
        for id in &self.planes {
            for state in [old, new] {
                if let Some(plane) = state.planes.get(id) {
                    out.insert(plane.crtc);
                }
            }
        }
        for id in &self.connectors {
            let conn = kmsprobe_core::ConnectorId(id.0);
            for state in [old, new] {
                if let Some(crtc) = state.connectors.get(&conn) {
                    out.insert(*crtc);
                }
            }
        }
        out.remove(&CrtcId::NONE);
        out
    }
}

impl SimDevice {
    pub(super) fn commit_atomic(&self, req: &AtomicRequest) -> KmsResult<()> {
        let flags = req.known_flags().ok_or(KmsError::InvalidArgument)?;
        if flags.contains(AtomicFlags::PAGE_FLIP_ASYNC)
            || flags.contains(AtomicFlags::TEST_ONLY | AtomicFlags::PAGE_FLIP_EVENT)
            || req.reserved != 0
        {
            return Err(KmsError::InvalidArgument);
        }
        let test_only = flags.contains(AtomicFlags::TEST_ONLY);
        let want_event = flags.contains(AtomicFlags::PAGE_FLIP_EVENT);

        let mut sim = self.state.lock();
        let mut fences = self.fences.lock();
        let mem = &self.memory;
        let mut new = sim.current.clone();
        let mut touched = Touched::default();

        let mut cursor = 0u64;
        for i in 0..u64::from(req.count_objs) {
            let obj = ObjectId(mem.read_u32(element(req.objs_ptr, i, 4)?)?);
            let kind = sim
                .object_kind(obj)
                .filter(|k| k.has_properties())
                .ok_or(KmsError::NoEntry)?;
            let count = mem.read_u32(element(req.count_props_ptr, i, 4)?)?;
            for _ in 0..count {
                let prop = PropertyId(mem.read_u32(element(req.props_ptr, cursor, 4)?)?);
                let value = mem.read_u64(element(req.prop_values_ptr, cursor, 8)?)?;
                cursor += 1;
                sim.set_property(&mut new, obj, kind, prop, value, &fences)?;
            }
            match kind {
                ObjectKind::Plane => {
                    touched.planes.insert(PlaneId(obj.0));
                }
                ObjectKind::Crtc => {
                    touched.crtcs.insert(CrtcId(obj.0));
                }
                _ => {
                    touched.connectors.insert(obj);
                }
            }
        }

        let affected = touched.affected_crtcs(&sim.current, &new);
        if want_event && affected.is_empty() {
            return Err(KmsError::InvalidArgument);
        }
        let mut out_fences = Vec::new();
        for (id, crtc) in &new.crtcs {
            if crtc.out_fence_ptr != 0 {
                mem.write_i32(crtc.out_fence_ptr, -1)?;
                out_fences.push((*id, crtc.out_fence_ptr));
            }
        }
        if !out_fences.is_empty() && !test_only && !want_event {
            return Err(KmsError::InvalidArgument);
        }
        let signaled: Vec<CrtcId> = if want_event {
            affected.iter().copied().collect()
        } else {
            out_fences.iter().map(|(id, _)| *id).collect()
        };
        for id in &signaled {
            if !sim.current.crtc(*id)?.active && !new.crtc(*id)?.active {
                return Err(KmsError::InvalidArgument);
            }
        }

        let allow_modeset = flags.contains(AtomicFlags::ALLOW_MODESET);
        sim.check_state(&sim.current, &new, allow_modeset)?;
        if test_only {
            trace!(target: "kmsprobe::device", objects = req.count_objs, "test-only commit passed");
            return Ok(());
        }

        let pending: Vec<FencePoint> = touched
            .planes
            .iter()
            .filter_map(|id| new.planes.get(id).and_then(|p| p.in_fence))
            .collect();
        let deadline = Instant::now() + Duration::from_millis(self.config.fence_timeout_ms);
        for point in pending {
            while !fences.is_signaled(point) {
                if self.fence_cond.wait_until(&mut fences, deadline).timed_out()
                    && !fences.is_signaled(point)
                {
                    debug!(target: "kmsprobe::device", ?point, "input fence timed out");
                    return Err(KmsError::TimedOut);
                }
            }
        }

        let mut created = Vec::with_capacity(out_fences.len());
        for (_, ptr) in &out_fences {
            let fd = fences.signaled_fence();
            created.push(fd);
            if mem.write_i32(*ptr, fd).is_err() {
                discard_out_fences(&mut fences, created);
                return Err(KmsError::Fault);
            }
        }

        sim.commit_state(new, &touched.planes)?;
        if want_event {
            for id in affected {
                let seq = sim.sequences.entry(id).or_insert(0);
                *seq = seq.wrapping_add(1);
                let sequence = *seq;
                sim.events.push_back(FlipEvent {
                    crtc_id: id,
                    user_data: req.user_data,
                    sequence,
                });
            }
        }
        trace!(
            target: "kmsprobe::device",
            objects = req.count_objs,
            properties = cursor,
            out_fences = created.len(),
            "commit applied"
        );
        Ok(())
    }
}
