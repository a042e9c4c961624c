//! Raw request robustness tests
//!
//! The fixed probe table must reproduce its exact outcomes, and arbitrary
//! requests assembled from real object and property ids must never take
//! the device down or leave a rejected request half applied.

use super::*;
use kmsprobe::kmsprobe_core::{
    AtomicFlags, AtomicRequest, ConnectorProperty, CrtcProperty, KmsError, PlaneProperty,
    PropertyKind, ATOMIC_REQUEST_SIZE,
};
use kmsprobe::fuzzer::{MAX_OBJECTS, MAX_PROPS};
use kmsprobe::kmsprobe_device::{SimConfig, SimDevice};
use kmsprobe::{KmsContext, RawPayload};
use proptest::prelude::*;

// =============================================================================
// PROBE TABLE
// =============================================================================

/// Every probe reproduces its expected outcome on a lit pipe
#[test]
fn test_probe_table_passes() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    let ran = ctx.run_probes(setup.pipe).unwrap();
    assert_eq!(ran, ctx.probes(setup.pipe).unwrap().len());
    ctx.verify_staged(kmsprobe::kmsprobe_core::RelaxPolicy::NONE)
        .unwrap();
    clear(&mut ctx, setup);
}

/// The probe table also holds with several surfaces per pipe
#[test]
fn test_probe_table_with_overlays() {
    let mut ctx = ctx_with_device(SimConfig {
        overlays_per_pipe: 4,
        pipes: 2,
        ..Default::default()
    });
    let setup = lit(&mut ctx);
    ctx.run_probes(setup.pipe).unwrap();
    clear(&mut ctx, setup);
}

/// Probes need a lit pipe; a dark one is a skip
#[test]
fn test_probes_on_dark_pipe_are_unsupported() {
    let ctx = reference_ctx();
    let pipe = ctx.pipe(0).unwrap();
    assert!(ctx.probes(pipe).unwrap_err().is_skip());
}

// =============================================================================
// HEADER DECODING
// =============================================================================

fn header(flags: u32, reserved: u64) -> [u8; ATOMIC_REQUEST_SIZE] {
    AtomicRequest {
        flags,
        reserved,
        ..Default::default()
    }
    .to_bytes()
}

/// A header of the wrong size never reaches the device
#[test]
fn test_truncated_header_is_rejected() {
    let mut ctx = reference_ctx();
    let bytes = header(0, 0);
    assert_eq!(
        ctx.submit_raw_bytes(&bytes[..ATOMIC_REQUEST_SIZE - 1]),
        Err(KmsError::InvalidArgument)
    );
    let mut long = bytes.to_vec();
    long.push(0);
    assert_eq!(ctx.submit_raw_bytes(&long), Err(KmsError::InvalidArgument));
}

/// Unknown flag bits and a nonzero reserved word are rejected
#[test]
fn test_header_flag_checks() {
    let mut ctx = reference_ctx();
    assert_eq!(
        ctx.submit_raw_bytes(&header(0x8000_0000, 0)),
        Err(KmsError::InvalidArgument)
    );
    assert_eq!(
        ctx.submit_raw_bytes(&header(0, 1)),
        Err(KmsError::InvalidArgument)
    );
    assert_eq!(
        ctx.submit_raw_bytes(&header(AtomicFlags::PAGE_FLIP_ASYNC.bits(), 0)),
        Err(KmsError::InvalidArgument)
    );
    assert_eq!(
        ctx.submit_raw_bytes(&header(
            (AtomicFlags::TEST_ONLY | AtomicFlags::PAGE_FLIP_EVENT).bits(),
            0
        )),
        Err(KmsError::InvalidArgument)
    );
}

/// A request with no objects succeeds whatever its pointers say
#[test]
fn test_empty_request_succeeds() {
    let mut ctx = reference_ctx();
    let setup = lit(&mut ctx);
    let before = ctx.capture_baseline().unwrap();
    assert_eq!(ctx.submit_raw(&RawPayload::default().null_pointers()), Ok(()));
    assert_eq!(ctx.submit_raw_bytes(&header(0, 0)), Ok(()));
    ctx.verify_unchanged(&before).unwrap();
    clear(&mut ctx, setup);
}

// =============================================================================
// ARBITRARY REQUESTS
// =============================================================================

/// Ids the random requests draw from
struct Pools {
    objects: Vec<u32>,
    props: Vec<u32>,
    values: Vec<u64>,
}

fn pools(ctx: &KmsContext<SimDevice>) -> Pools {
    let model = ctx.model();
    let mut objects = vec![0, u32::MAX];
    let mut props = vec![0, u32::MAX];
    for plane in model.plane_handles() {
        let state = model.plane(plane).state();
        objects.push(state.id().0);
        props.extend(PlaneProperty::ALL.iter().filter_map(|p| state.property_id(*p)).map(|p| p.0));
    }
    for pipe in model.pipe_handles() {
        let state = model.pipe(pipe).state();
        objects.push(state.id().0);
        props.extend(CrtcProperty::ALL.iter().filter_map(|p| state.property_id(*p)).map(|p| p.0));
    }
    for output in model.output_handles() {
        let state = model.output(output).state();
        objects.push(state.id().0);
        props.extend(
            ConnectorProperty::ALL
                .iter()
                .filter_map(|p| state.property_id(*p))
                .map(|p| p.0),
        );
    }
    let mut values: Vec<u64> = objects.iter().map(|id| u64::from(*id)).collect();
    values.extend([1, 2, 16, 1 << 16, 1 << 32, u64::MAX, u64::MAX - 1]);
    Pools {
        objects,
        props,
        values,
    }
}

/// Index-based description of a request, resolved against the pools
#[derive(Debug, Clone)]
struct Shape {
    flags: u32,
    count_objs: u32,
    objs: Vec<usize>,
    counts: Vec<u32>,
    props: Vec<(usize, usize)>,
}

fn shape() -> impl Strategy<Value = Shape> {
    let flags = prop_oneof![
        Just(0u32),
        Just(AtomicFlags::TEST_ONLY.bits()),
        Just(AtomicFlags::ALLOW_MODESET.bits()),
        Just((AtomicFlags::TEST_ONLY | AtomicFlags::ALLOW_MODESET).bits()),
        Just(AtomicFlags::PAGE_FLIP_EVENT.bits()),
        any::<u32>(),
    ];
    (
        flags,
        0u32..=(MAX_OBJECTS as u32 + 2),
        prop::collection::vec(any::<usize>(), MAX_OBJECTS),
        prop::collection::vec(0u32..24, MAX_OBJECTS),
        prop::collection::vec((any::<usize>(), any::<usize>()), 32),
    )
        .prop_map(|(flags, count_objs, objs, counts, props)| Shape {
            flags,
            count_objs,
            objs,
            counts,
            props,
        })
}

fn build(shape: &Shape, pools: &Pools) -> RawPayload {
    let mut payload = RawPayload {
        flags: shape.flags,
        count_objs: shape.count_objs,
        ..Default::default()
    };
    for (i, pick) in shape.objs.iter().enumerate() {
        payload.objs[i] = pools.objects[pick % pools.objects.len()];
        payload.counts[i] = shape.counts[i];
    }
    for i in 0..MAX_PROPS {
        let (p, v) = shape.props[i % shape.props.len()];
        payload.props[i] = pools.props[p % pools.props.len()];
        payload.values[i] = pools.values[v % pools.values.len()];
    }
    payload
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Arbitrary requests never panic, and a rejected one changes nothing
    #[test]
    fn prop_rejected_requests_change_nothing(shape in shape()) {
        let mut ctx = reference_ctx();
        let _setup = lit(&mut ctx);
        let pools = pools(&ctx);
        let payload = build(&shape, &pools);

        let before = ctx.capture_baseline().unwrap();
        if ctx.submit_raw(&payload).is_err() {
            prop_assert!(ctx.verify_unchanged(&before).is_ok());
        }
        prop_assert_eq!(ctx.device().memory().mapping_count(), 0);
    }

    /// Test-only requests never change anything, accepted or not
    #[test]
    fn prop_test_only_requests_change_nothing(shape in shape()) {
        let mut ctx = reference_ctx();
        let _setup = lit(&mut ctx);
        let pools = pools(&ctx);
        let mut payload = build(&shape, &pools);
        payload.flags = (AtomicFlags::TEST_ONLY | AtomicFlags::ALLOW_MODESET).bits();

        let before = ctx.capture_baseline().unwrap();
        let _ = ctx.submit_raw(&payload);
        prop_assert!(ctx.verify_unchanged(&before).is_ok());
    }
}
