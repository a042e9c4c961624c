//! kmsprobe - consistency verification for atomic display configuration
//!
//! kmsprobe drives a display controller through its atomic and legacy
//! interfaces and proves that the two never disagree, that rejected
//! transactions change nothing, and that the atomic ioctl rejects
//! malformed requests exactly where it should.
//!
//! # Quick Start
//!
//! ```no_run
//! use kmsprobe::{KmsContext, ProbeConfig, Scenario};
//!
//! let mut ctx = KmsContext::with_reference_device(ProbeConfig::default())?;
//! for (scenario, outcome) in kmsprobe::run_all(&mut ctx, Scenario::ALL) {
//!     println!("{}: {:?}", scenario, outcome);
//! }
//! # Ok::<(), kmsprobe::VerifyError>(())
//! ```
//!
//! # Architecture
//!
//! - [`kmsprobe_core`]: ids, errors, property model and wire formats
//! - [`kmsprobe_device`]: the device traits and the reference device
//! - the engine, re-exported at the top level: staging, commit driver,
//!   verifier, fuzzer and scenarios

pub use kmsprobe_core;
pub use kmsprobe_device;
pub use kmsprobe_engine::*;
