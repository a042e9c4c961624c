//! Raw transaction fuzzer
//!
//! Bypasses the property model and hands the device hand-built request
//! arrays. Every probe starts from a fresh, valid baseline payload (valid
//! pointers, zero counts), mutates it, and must reproduce an exact
//! outcome. After each probe the pipeline and its primary surface must
//! still read back exactly as they did before fuzzing started.

use crate::context::KmsContext;
use crate::error::{VerifyError, VerifyResult};
use crate::model::{PipeHandle, Target};
use crate::payload::{place_u32s, place_u64s};
use crate::snapshot::Snapshot;
use kmsprobe_core::{
    return_code, AtomicFlags, AtomicRequest, CrtcProperty, KmsError, KmsResult, PlaneProperty,
    RelaxPolicy,
};
use kmsprobe_device::Platform;
use tracing::{debug, info};

/// Object capacity of a raw payload
pub const MAX_OBJECTS: usize = 16;

/// Property capacity of a raw payload
pub const MAX_PROPS: usize = 256;

/// Fixed-capacity request under full caller control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    /// Raw flag word
    pub flags: u32,
    /// Objects the device is told to read
    pub count_objs: u32,
    /// Object ids
    pub objs: [u32; MAX_OBJECTS],
    /// Property count per object
    pub counts: [u32; MAX_OBJECTS],
    /// Property ids
    pub props: [u32; MAX_PROPS],
    /// Property values
    pub values: [u64; MAX_PROPS],
    /// Must be zero
    pub reserved: u64,
    /// Echoed in flip events
    pub user_data: u64,
    /// Replaces the placed object array address
    pub objs_ptr: Option<u64>,
    /// Replaces the placed count array address
    pub counts_ptr: Option<u64>,
    /// Replaces the placed property id array address
    pub props_ptr: Option<u64>,
    /// Replaces the placed value array address
    pub values_ptr: Option<u64>,
}

impl Default for RawPayload {
    fn default() -> Self {
        RawPayload {
            flags: 0,
            count_objs: 0,
            objs: [0; MAX_OBJECTS],
            counts: [0; MAX_OBJECTS],
            props: [0; MAX_PROPS],
            values: [0; MAX_PROPS],
            reserved: 0,
            user_data: 0,
            objs_ptr: None,
            counts_ptr: None,
            props_ptr: None,
            values_ptr: None,
        }
    }
}

impl RawPayload {
    /// Every object slot set to `obj`, `count` of them submitted
    pub fn objects(obj: u32, count: u32) -> Self {
        RawPayload {
            count_objs: count,
            objs: [obj; MAX_OBJECTS],
            ..Default::default()
        }
    }

    /// One object carrying one property
    pub fn single(obj: u32, prop: u32, value: u64) -> Self {
        let mut p = RawPayload::objects(obj, 1);
        p.counts[0] = 1;
        p.props[0] = prop;
        p.values[0] = value;
        p
    }

    /// Fill every property slot with the same pair
    pub fn fill_props(mut self, prop: u32, value: u64) -> Self {
        self.props = [prop; MAX_PROPS];
        self.values = [value; MAX_PROPS];
        self
    }

    /// Null every pointer
    pub fn null_pointers(mut self) -> Self {
        self.objs_ptr = Some(0);
        self.counts_ptr = Some(0);
        self.props_ptr = Some(0);
        self.values_ptr = Some(0);
        self
    }
}

/// One row of the probe table
#[derive(Debug, Clone)]
pub struct Probe {
    /// Short description
    pub name: &'static str,
    /// Request to submit
    pub payload: RawPayload,
    /// Exact required outcome
    pub expected: KmsResult<()>,
}

impl Probe {
    fn new(name: &'static str, payload: RawPayload, expected: KmsResult<()>) -> Self {
        Probe {
            name,
            payload,
            expected,
        }
    }
}

impl<P: Platform + 'static> KmsContext<P> {
    /// Place a raw payload's arrays and submit it
    ///
    /// The property model is not consulted or updated; events a
    /// successful submission queues are discarded.
    pub fn submit_raw(&mut self, payload: &RawPayload) -> KmsResult<()> {
        let mem = self.device.memory();
        let objs = place_u32s(mem, &payload.objs)?;
        let counts = place_u32s(mem, &payload.counts)?;
        let props = place_u32s(mem, &payload.props)?;
        let values = place_u64s(mem, &payload.values)?;
        let request = AtomicRequest {
            flags: payload.flags,
            count_objs: payload.count_objs,
            objs_ptr: payload.objs_ptr.unwrap_or(objs.addr()),
            count_props_ptr: payload.counts_ptr.unwrap_or(counts.addr()),
            props_ptr: payload.props_ptr.unwrap_or(props.addr()),
            prop_values_ptr: payload.values_ptr.unwrap_or(values.addr()),
            reserved: payload.reserved,
            user_data: payload.user_data,
        };
        let result = self.device.atomic_commit(&request);
        if result.is_ok() {
            self.device.read_events();
        }
        result
    }

    /// Decode a request header from its wire layout and submit it as is
    pub fn submit_raw_bytes(&mut self, header: &[u8]) -> KmsResult<()> {
        let request = AtomicRequest::from_bytes(header)?;
        let result = self.device.atomic_commit(&request);
        if result.is_ok() {
            self.device.read_events();
        }
        result
    }

    /// The probe table for a lit pipeline
    pub fn probes(&self, pipe: PipeHandle) -> VerifyResult<Vec<Probe>> {
        let p = self.model.pipe(pipe);
        let crtc = p.id().0;
        let primary = p.primary();
        let plane = self.model.plane(primary).id().0;
        let output = p
            .output()
            .map(|o| self.model.output(o).id().0)
            .ok_or_else(|| VerifyError::unsupported("raw probes need a routed output"))?;
        let mode = self.get(pipe, CrtcProperty::ModeId)?;
        let fb = self.get(primary, PlaneProperty::FbId)?;
        if mode == 0 || fb == 0 {
            return Err(VerifyError::unsupported("raw probes need a lit pipeline"));
        }
        let mode_prop = pipe
            .state(&self.model)
            .property_id(CrtcProperty::ModeId)
            .ok_or_else(|| VerifyError::unsupported("pipeline has no MODE_ID"))?
            .0;

        let mut probes = vec![
            Probe::new(
                "empty request, null pointers",
                RawPayload::default().null_pointers(),
                Ok(()),
            ),
            Probe::new("empty request, valid pointers", RawPayload::default(), Ok(())),
            Probe::new(
                "empty request with page flip event",
                RawPayload {
                    flags: AtomicFlags::PAGE_FLIP_EVENT.bits(),
                    ..Default::default()
                },
                Err(KmsError::InvalidArgument),
            ),
            Probe::new(
                "nonsense flags",
                RawPayload {
                    flags: 0xdead_beef,
                    ..Default::default()
                },
                Err(KmsError::InvalidArgument),
            ),
            Probe::new(
                "reserved field set",
                RawPayload {
                    reserved: 1,
                    ..Default::default()
                },
                Err(KmsError::InvalidArgument),
            ),
            Probe::new("reserved field reset", RawPayload::default(), Ok(())),
            Probe::new(
                "zero object ids",
                RawPayload::objects(0, MAX_OBJECTS as u32),
                Err(KmsError::NoEntry),
            ),
            Probe::new(
                "object is a mode blob",
                RawPayload::objects(mode as u32, 1),
                Err(KmsError::NoEntry),
            ),
            Probe::new(
                "object is a framebuffer",
                RawPayload::objects(fb as u32, 1),
                Err(KmsError::NoEntry),
            ),
            Probe::new(
                "pipeline objects without properties",
                RawPayload::objects(crtc, MAX_OBJECTS as u32),
                Ok(()),
            ),
        ];

        for (name, id) in [
            ("property id 0", 0),
            ("property id is the pipeline", crtc),
            ("property id is a plane", plane),
            ("property id is an output", output),
            ("property id is a blob", mode as u32),
        ] {
            probes.push(Probe::new(
                name,
                RawPayload::single(crtc, id, 0),
                Err(KmsError::NoEntry),
            ));
        }

        let mut one_object = RawPayload::objects(crtc, 1).fill_props(mode_prop, mode);
        one_object.counts[0] = MAX_PROPS as u32;
        probes.push(Probe::new("current mode 256 times on one object", one_object, Ok(())));
        let mut spread =
            RawPayload::objects(crtc, MAX_OBJECTS as u32).fill_props(mode_prop, mode);
        spread.counts = [(MAX_PROPS / MAX_OBJECTS) as u32; MAX_OBJECTS];
        probes.push(Probe::new("current mode 256 times over 16 objects", spread, Ok(())));

        let valid = RawPayload::single(crtc, mode_prop, mode);
        probes.push(Probe::new(
            "null object pointer",
            RawPayload {
                objs_ptr: Some(0),
                ..valid.clone()
            },
            Err(KmsError::Fault),
        ));
        probes.push(Probe::new(
            "null count pointer",
            RawPayload {
                counts_ptr: Some(0),
                ..valid.clone()
            },
            Err(KmsError::Fault),
        ));
        probes.push(Probe::new(
            "null property pointer",
            RawPayload {
                props_ptr: Some(0),
                ..valid.clone()
            },
            Err(KmsError::Fault),
        ));
        probes.push(Probe::new(
            "null value pointer",
            RawPayload {
                values_ptr: Some(0),
                ..valid.clone()
            },
            Err(KmsError::Fault),
        ));

        probes.push(Probe::new(
            "object count past the array",
            RawPayload::objects(crtc, MAX_OBJECTS as u32 + 1),
            Err(KmsError::Fault),
        ));
        probes.push(Probe::new(
            "object pointer at the top of the address space",
            RawPayload {
                objs_ptr: Some(u64::MAX - 3),
                ..valid.clone()
            },
            Err(KmsError::Fault),
        ));
        let mut overflow = RawPayload::objects(crtc, 1).fill_props(mode_prop, mode);
        overflow.counts[0] = u32::MAX;
        probes.push(Probe::new("property count overflowing", overflow, Err(KmsError::Fault)));
        let mut split = RawPayload::objects(crtc, 2).fill_props(mode_prop, mode);
        split.counts[0] = 200;
        split.counts[1] = 100;
        probes.push(Probe::new(
            "property counts overflowing across objects",
            split,
            Err(KmsError::Fault),
        ));
        let mut wrapping =
            RawPayload::objects(crtc, MAX_OBJECTS as u32).fill_props(mode_prop, mode);
        wrapping.counts = [u32::MAX / MAX_OBJECTS as u32 + 1; MAX_OBJECTS];
        probes.push(Probe::new(
            "property counts summing past u32",
            wrapping,
            Err(KmsError::Fault),
        ));
        for (name, count) in [
            ("property count a quarter of u32", u32::MAX / 4),
            ("property count one below u32 max", u32::MAX - 1),
        ] {
            let mut huge = RawPayload::objects(crtc, 1).fill_props(mode_prop, mode);
            huge.counts[0] = count;
            probes.push(Probe::new(name, huge, Err(KmsError::Fault)));
        }
        for (name, count) in [
            ("object array straddling the address space end", MAX_OBJECTS as u32),
            ("single object at the address space end", 1),
        ] {
            probes.push(Probe::new(
                name,
                RawPayload {
                    count_objs: count,
                    objs_ptr: Some(u64::MAX - 4),
                    ..valid.clone()
                },
                Err(KmsError::Fault),
            ));
        }

        probes.push(Probe::new(
            "test only with page flip event",
            RawPayload {
                flags: (AtomicFlags::TEST_ONLY | AtomicFlags::PAGE_FLIP_EVENT).bits(),
                ..valid
            },
            Err(KmsError::InvalidArgument),
        ));
        Ok(probes)
    }

    /// Run every probe against `pipe`; returns how many ran
    pub fn run_probes(&mut self, pipe: PipeHandle) -> VerifyResult<usize> {
        let primary = self.model.pipe(pipe).primary();
        let pipe_before = self.capture(pipe)?;
        let plane_before = self.capture(primary)?;
        let probes = self.probes(pipe)?;
        for probe in &probes {
            let result = self.submit_raw(&probe.payload);
            debug!(
                target: "kmsprobe::fuzz",
                probe = probe.name,
                code = return_code(&result),
                "probe submitted"
            );
            if result != probe.expected {
                return Err(VerifyError::UnexpectedOutcome {
                    context: format!("probe '{}'", probe.name),
                    expected: return_code(&probe.expected),
                    actual: return_code(&result),
                });
            }
            self.expect_snapshot(&pipe_before, pipe)?;
            self.expect_snapshot(&plane_before, primary)?;
        }
        info!(target: "kmsprobe::fuzz", probes = probes.len(), "raw probes passed");
        Ok(probes.len())
    }

    fn expect_snapshot<T: Target>(
        &self,
        before: &Snapshot<T::Prop>,
        target: T,
    ) -> VerifyResult<()> {
        self.capture(target)?
            .check_against(before, RelaxPolicy::NONE, &*self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeConfig;
    use crate::driver::CommitStyle;
    use kmsprobe_core::{PixelFormat, ATOMIC_REQUEST_SIZE};
    use kmsprobe_device::{DisplayDevice, SimDevice};

    fn lit() -> (KmsContext<SimDevice>, PipeHandle) {
        let mut ctx = KmsContext::with_reference_device(ProbeConfig::default()).unwrap();
        let pipe = PipeHandle(0);
        let mode = ctx.preferred_mode(pipe).unwrap();
        let buf = ctx
            .alloc_buffer(u32::from(mode.hdisplay), u32::from(mode.vdisplay), PixelFormat::XRGB8888)
            .unwrap();
        ctx.stage_pipe_enabled(pipe, &mode).unwrap();
        let primary = ctx.model().pipe(pipe).primary();
        ctx.stage_plane(primary, pipe, &buf, 0, 0);
        ctx.try_commit(CommitStyle::atomic()).unwrap();
        (ctx, pipe)
    }

    #[test]
    fn test_probe_table_passes_on_reference_device() {
        let (mut ctx, pipe) = lit();
        let ran = ctx.run_probes(pipe).unwrap();
        assert_eq!(ran, ctx.probes(pipe).unwrap().len());
    }

    #[test]
    fn test_count_and_pointer_overflows_fault() {
        let (mut ctx, pipe) = lit();
        let primary = ctx.model().pipe(pipe).primary();
        let pipe_before = ctx.capture(pipe).unwrap();
        let plane_before = ctx.capture(primary).unwrap();
        let names = [
            "property counts summing past u32",
            "property count a quarter of u32",
            "property count one below u32 max",
            "object array straddling the address space end",
            "single object at the address space end",
        ];
        let probes = ctx.probes(pipe).unwrap();
        for name in names {
            let probe = probes.iter().find(|p| p.name == name).unwrap();
            assert_eq!(ctx.submit_raw(&probe.payload), Err(KmsError::Fault), "{name}");
            ctx.expect_snapshot(&pipe_before, pipe).unwrap();
            ctx.expect_snapshot(&plane_before, primary).unwrap();
        }
    }

    #[test]
    fn test_wrapping_counts_sum_to_zero() {
        let (ctx, pipe) = lit();
        let probes = ctx.probes(pipe).unwrap();
        let wrapping = probes
            .iter()
            .find(|p| p.name == "property counts summing past u32")
            .unwrap();
        let sum = wrapping
            .payload
            .counts
            .iter()
            .fold(0u32, |acc, c| acc.wrapping_add(*c));
        assert_eq!(sum, 0);
        assert_eq!(wrapping.payload.count_objs, MAX_OBJECTS as u32);
    }

    #[test]
    fn test_probes_need_lit_pipe() {
        let mut ctx = KmsContext::with_reference_device(ProbeConfig::default()).unwrap();
        assert!(ctx.run_probes(PipeHandle(0)).unwrap_err().is_skip());
    }

    #[test]
    fn test_arrays_are_unmapped_after_submit() {
        let (mut ctx, _) = lit();
        let before = ctx.device().memory().mapping_count();
        ctx.submit_raw(&RawPayload::default()).unwrap();
        assert_eq!(ctx.device().memory().mapping_count(), before);
    }

    #[test]
    fn test_raw_bytes_need_exact_header() {
        let (mut ctx, _) = lit();
        let header = AtomicRequest::default().to_bytes();
        assert_eq!(header.len(), ATOMIC_REQUEST_SIZE);
        ctx.submit_raw_bytes(&header).unwrap();
        assert!(ctx.submit_raw_bytes(&header[..ATOMIC_REQUEST_SIZE - 1]).is_err());
    }
}
