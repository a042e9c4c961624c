//! Reference device topology
//!
//! Persisted as the `[device]` section of `kmsprobe.toml`.

use kmsprobe_core::{KmsError, KmsResult};
use serde::{Deserialize, Serialize};

/// Shape of the simulated display hardware
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Number of pipelines, each with one output routed to it by default
    pub pipes: u32,
    /// Overlay surfaces per pipeline
    pub overlays_per_pipe: u32,
    /// Each pipeline has a cursor surface
    pub cursor: bool,
    /// `zpos` is settable; otherwise it is an immutable per-surface value
    pub mutable_zpos: bool,
    /// Preferred mode width
    pub width: u16,
    /// Preferred mode height
    pub height: u16,
    /// Preferred mode refresh rate
    pub refresh: u32,
    /// Largest cursor edge in pixels
    pub cursor_max: u32,
    /// How long a commit waits on an unsignaled input fence
    pub fence_timeout_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            pipes: 1,
            overlays_per_pipe: 1,
            cursor: true,
            mutable_zpos: false,
            width: 256,
            height: 192,
            refresh: 60,
            cursor_max: 64,
            fence_timeout_ms: 1000,
        }
    }
}

impl SimConfig {
    /// Reject topologies the device cannot model
    pub fn validate(&self) -> KmsResult<()> {
        let pipes_ok = (1..=8).contains(&self.pipes);
        let mode_ok = self.width > 0 && self.height > 0 && self.refresh > 0;
        if !pipes_ok || !mode_ok || self.cursor_max == 0 || self.overlays_per_pipe > 8 {
            return Err(KmsError::InvalidArgument);
        }
        Ok(())
    }
}
