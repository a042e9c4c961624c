//! Atomic Modesetting Comprehensive Test Suite
//!
//! Runs the verification engine end to end against the reference device:
//! staging, every commit style, both query paths, the raw request fuzzer
//! and every named scenario.
//!
//! ## Areas Covered
//!
//! - `coherency`: atomic and legacy views agree after every commit style
//! - `invalid_params`: rejected requests return exact codes and change nothing
//! - `fuzz`: the probe table plus property-based raw requests
//! - `layering`: zpos occlusion and damage uploads
//! - `fences`: input fences, out-fences and events
//! - `config`: loading `kmsprobe.toml` and running from it
//!
//! ## Running Tests
//!
//! ```bash
//! # Run the whole suite
//! cargo test --test atomic_comprehensive
//!
//! # Run one area
//! cargo test --test atomic_comprehensive fences::
//!
//! # Run with log output
//! RUST_LOG=kmsprobe=debug cargo test --test atomic_comprehensive -- --nocapture
//! ```

pub mod test_utils;

pub mod coherency;
pub mod config;
pub mod fences;
pub mod fuzz;
pub mod invalid_params;
pub mod layering;

pub use test_utils::*;
