//! Engine error types
//!
//! Device failures arrive as [`KmsError`] and are wrapped, never swallowed.
//! Everything the verifier detects on its own (wrong outcome, a query path
//! disagreeing with the staged state, a checksum that moved) gets a
//! dedicated variant carrying enough context to diagnose the failure from
//! the message alone.

use kmsprobe_core::{KmsError, ObjectId};
use std::fmt;
use thiserror::Error;

/// Result type for engine operations
pub type VerifyResult<T> = std::result::Result<T, VerifyError>;

/// Which query path produced a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryPath {
    /// Object property query
    Atomic,
    /// Legacy per-object query
    Legacy,
}

impl fmt::Display for QueryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryPath::Atomic => f.write_str("atomic"),
            QueryPath::Legacy => f.write_str("legacy"),
        }
    }
}

/// Verification failure
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The device failed an operation the engine needed to succeed
    #[error("device error: {0}")]
    Device(#[from] KmsError),

    /// A submission returned a different result than required
    #[error("{context}: expected return {expected}, got {actual}")]
    UnexpectedOutcome {
        /// What was being submitted
        context: String,
        /// Required signed return code
        expected: i32,
        /// Observed signed return code
        actual: i32,
    },

    /// A query path disagrees with the expected state
    #[error("{path} view of #{object} disagrees on {property}: expected {expected}, got {actual}")]
    Mismatch {
        /// Query path that was read
        path: QueryPath,
        /// Object that was read
        object: ObjectId,
        /// Property or legacy field name
        property: &'static str,
        /// Expected value, formatted
        expected: String,
        /// Observed value, formatted
        actual: String,
    },

    /// Output checksum differs from the reference
    #[error("{context}: output checksum {actual:#010x} differs from reference {expected:#010x}")]
    ChecksumMismatch {
        /// Which comparison failed
        context: String,
        /// Reference checksum
        expected: u32,
        /// Observed checksum
        actual: u32,
    },

    /// Repeated submissions of the same state produced different results
    #[error("test-only submission {attempt} returned {actual}, first attempt returned {first}")]
    NotIdempotent {
        /// Zero-based attempt index
        attempt: u32,
        /// Return code of the first attempt
        first: i32,
        /// Return code of this attempt
        actual: i32,
    },

    /// The device lacks something a scenario needs
    #[error("missing capability: {0}")]
    Unsupported(String),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl VerifyError {
    /// Build an [`VerifyError::Unsupported`]
    pub fn unsupported(what: impl Into<String>) -> Self {
        VerifyError::Unsupported(what.into())
    }

    /// Whether a scenario should be reported as skipped rather than failed
    pub fn is_skip(&self) -> bool {
        matches!(self, VerifyError::Unsupported(_))
    }
}

/// Configuration loading failure
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("{0}")]
    Io(String),

    /// The file is not valid TOML for this schema
    #[error("{0}")]
    Parse(String),

    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
