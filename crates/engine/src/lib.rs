//! Verification engine for kmsprobe
//!
//! This crate sits on top of a [`kmsprobe_device::Platform`]:
//! - Model: discovered pipelines, surfaces and outputs with staged values
//! - Driver: submits the staged state as atomic, legacy or universal calls
//! - Verifier: checks both query paths after every submission
//! - Fuzzer: hand-built raw requests with exact expected outcomes
//! - Scenarios: the named end-to-end checks
//!
//! Everything runs through an explicit [`KmsContext`]; there is no global
//! state besides the log subscriber.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod fuzzer;
pub mod legacy;
pub mod logging;
pub mod model;
pub mod payload;
pub mod scenarios;
pub mod snapshot;
pub mod verifier;

pub use config::ProbeConfig;
pub use context::KmsContext;
pub use driver::CommitStyle;
pub use error::{ConfigError, QueryPath, VerifyError, VerifyResult};
pub use fuzzer::{Probe, RawPayload};
pub use legacy::{LegacyPipeView, LegacyPlaneView};
pub use model::{DisplayModel, ObjectState, OutputHandle, PipeHandle, PlaneHandle, Target};
pub use scenarios::fixture::Setup;
pub use scenarios::{run_all, Outcome, Scenario};
pub use snapshot::Snapshot;
pub use verifier::StateBaseline;
