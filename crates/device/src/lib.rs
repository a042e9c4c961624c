//! Display device layer for kmsprobe
//!
//! The engine talks to hardware only through the traits in [`traits`].
//! This crate also ships [`SimDevice`], a software display controller that
//! implements them with kernel-like validation, so the whole verification
//! suite runs without a GPU.
//!
//! # Modules
//!
//! - `traits`: `DisplayDevice`, `BufferProvider`, `FenceProvider`, `ChecksumSource`
//! - `memory`: simulated client address space for transaction arrays
//! - `fd`: owned descriptor guard
//! - `config`: reference device topology
//! - `sim`: the reference device

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod fd;
pub mod memory;
pub mod sim;
pub mod traits;

pub use config::SimConfig;
pub use fd::FdGuard;
pub use memory::{Mapping, Protection, UserMemory, PAGE_SIZE};
pub use sim::SimDevice;
pub use traits::{
    Buffer, BufferProvider, ChecksumSource, ConnectorInfo, DisplayDevice, FenceProvider,
    FlipEvent, LegacyCrtc, LegacyPlane, PlaneConfig, Platform, Resources,
};
