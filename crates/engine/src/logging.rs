//! Log output
//!
//! The engine logs through `tracing` under these targets:
//!
//! - `kmsprobe::commit`: one `debug!` per submission
//! - `kmsprobe::verify`: verification outcomes, `warn!` on unexpected rejections
//! - `kmsprobe::fuzz`: raw probe results
//! - `kmsprobe::scenario`: scenario start and finish
//! - `kmsprobe::device`: the reference device

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a formatting subscriber filtered by `filter`
///
/// `RUST_LOG` takes precedence when set. Calling this more than once, or
/// after another subscriber was installed, is a no-op.
pub fn init(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Subscriber for tests: captured output, debug level
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("kmsprobe=debug"))
        .with(fmt::layer().with_test_writer())
        .try_init();
}
