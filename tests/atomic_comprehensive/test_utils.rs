//! Shared helpers for the atomic comprehensive suite

use kmsprobe::kmsprobe_device::{SimConfig, SimDevice};

// device calls the topic modules make on the concrete reference device
pub use kmsprobe::kmsprobe_device::{BufferProvider, DisplayDevice, FenceProvider};
use kmsprobe::scenarios::fixture::{atomic_clear, atomic_setup};
use kmsprobe::{KmsContext, ProbeConfig, Setup};

/// Reference device context with default settings
pub fn reference_ctx() -> KmsContext<SimDevice> {
    ctx_with(ProbeConfig::default())
}

/// Reference device context with a custom topology
pub fn ctx_with_device(device: SimConfig) -> KmsContext<SimDevice> {
    ctx_with(ProbeConfig {
        device,
        ..Default::default()
    })
}

/// Reference device context from a full config
pub fn ctx_with(config: ProbeConfig) -> KmsContext<SimDevice> {
    kmsprobe::logging::init_for_tests();
    KmsContext::with_reference_device(config).expect("reference device should start")
}

/// Context whose fence waits give up quickly
pub fn fast_fence_ctx() -> KmsContext<SimDevice> {
    ctx_with(ProbeConfig {
        fence_timeout_ms: 150,
        ..Default::default()
    })
}

/// Pipe 0 lit with a full-screen primary
pub fn lit(ctx: &mut KmsContext<SimDevice>) -> Setup {
    let pipe = ctx.pipe(0).expect("pipe 0");
    atomic_setup(ctx, pipe).expect("atomic setup")
}

/// Tear down what [`lit`] set up and check nothing leaked
pub fn clear(ctx: &mut KmsContext<SimDevice>, setup: Setup) {
    atomic_clear(ctx, setup).expect("atomic clear");
    assert_eq!(ctx.device().blob_count(), 0, "blobs leaked");
}
