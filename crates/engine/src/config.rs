//! Run configuration via `kmsprobe.toml`
//!
//! A missing file means defaults. `write_default_if_missing` drops a
//! commented template next to the run so settings can be tweaked without
//! recompiling.

use crate::error::ConfigError;
use kmsprobe_device::SimConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "kmsprobe.toml";

/// Run configuration loaded from `kmsprobe.toml`
///
/// # Example
///
/// ```toml
/// log_filter = "kmsprobe=info"
/// fence_timeout_ms = 1000
/// test_only_repeats = 3
/// cursor_size = 64
///
/// [device]
/// pipes = 1
/// overlays_per_pipe = 1
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// `tracing` filter directive; `RUST_LOG` wins when set
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Upper bound on how long a commit may block on an input fence
    #[serde(default = "default_fence_timeout_ms")]
    pub fence_timeout_ms: u64,
    /// How many times the test-only idempotence check resubmits
    #[serde(default = "default_test_only_repeats")]
    pub test_only_repeats: u32,
    /// Cursor edge used by cursor scenarios
    #[serde(default = "default_cursor_size")]
    pub cursor_size: u32,
    /// Reference device topology
    #[serde(default)]
    pub device: SimConfig,
}

fn default_log_filter() -> String {
    "kmsprobe=info".to_string()
}

fn default_fence_timeout_ms() -> u64 {
    1000
}

fn default_test_only_repeats() -> u32 {
    3
}

fn default_cursor_size() -> u32 {
    64
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            fence_timeout_ms: default_fence_timeout_ms(),
            test_only_repeats: default_test_only_repeats(),
            cursor_size: default_cursor_size(),
            device: SimConfig::default(),
        }
    }
}

impl ProbeConfig {
    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fence_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "fence_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.test_only_repeats == 0 {
            return Err(ConfigError::Invalid(
                "test_only_repeats must be at least 1".to_string(),
            ));
        }
        if self.cursor_size == 0 || self.cursor_size > self.device.cursor_max {
            return Err(ConfigError::Invalid(format!(
                "cursor_size {} must be between 1 and the device cursor limit {}",
                self.cursor_size, self.device.cursor_max
            )));
        }
        self.device.validate().map_err(|_| {
            ConfigError::Invalid(format!("unsupported [device] topology: {:?}", self.device))
        })
    }

    /// Device topology with the run's fence timeout applied
    pub fn device_config(&self) -> SimConfig {
        SimConfig {
            fence_timeout_ms: self.fence_timeout_ms,
            ..self.device.clone()
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# kmsprobe configuration
#
# tracing filter; RUST_LOG overrides it when set
log_filter = "kmsprobe=info"

# How long a commit may block on an unsignaled input fence (milliseconds)
fence_timeout_ms = 1000

# Number of TEST_ONLY resubmissions in the idempotence check
test_only_repeats = 3

# Cursor edge used by the cursor scenarios, at most device.cursor_max
cursor_size = 64

# Reference device topology
[device]
pipes = 1
overlays_per_pipe = 1
cursor = true
mutable_zpos = false
width = 256
height = 192
refresh = 60
cursor_max = 64
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Io(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: ProbeConfig = toml::from_str(&content).map_err(|e| {
            ConfigError::Parse(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                ConfigError::Io(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Io(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            ConfigError::Io(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
