//! Error types for the display subsystem
//!
//! Every submission or query against the display device reports failure as a
//! `KmsError`. Each variant maps onto one signed errno value so callers can
//! compare outcomes exactly, and onto one [`ErrorClass`] of the taxonomy used
//! when deciding whether a rejection was expected.

use std::fmt;
use thiserror::Error;

/// Result type alias for display device operations
pub type KmsResult<T> = std::result::Result<T, KmsError>;

/// Broad classification of a device error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Object or property does not exist
    Referential,
    /// Malformed value, blob size mismatch, incompatible flags
    Argument,
    /// Invalid memory reference inside a request payload
    Fault,
    /// Not enough space for the requested configuration
    Resource,
    /// Descriptor, timeout and anything else
    Other,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::Referential => "referential",
            ErrorClass::Argument => "argument",
            ErrorClass::Fault => "fault",
            ErrorClass::Resource => "resource",
            ErrorClass::Other => "other",
        };
        f.write_str(name)
    }
}

/// Error reported by the display device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum KmsError {
    /// ENOENT: unknown object id or property id
    #[error("no such object or property (ENOENT)")]
    NoEntry,

    /// EINVAL: invalid value, flag combination or configuration
    #[error("invalid argument (EINVAL)")]
    InvalidArgument,

    /// ERANGE: value outside the representable or supported range
    #[error("result out of range (ERANGE)")]
    OutOfRange,

    /// EFAULT: payload pointer does not reference accessible memory
    #[error("bad address (EFAULT)")]
    Fault,

    /// ENOSPC: buffer too small for the requested configuration
    #[error("no space for configuration (ENOSPC)")]
    NoSpace,

    /// ENOMEM: allocation failure
    #[error("out of memory (ENOMEM)")]
    OutOfMemory,

    /// EBADF: descriptor is not open
    #[error("bad file descriptor (EBADF)")]
    BadDescriptor,

    /// EBUSY: resource is in use
    #[error("device or resource busy (EBUSY)")]
    Busy,

    /// ETIMEDOUT: waiting on an input fence timed out
    #[error("timed out waiting for fence (ETIMEDOUT)")]
    TimedOut,

    /// Any errno without a dedicated variant
    #[error("device error code {0}")]
    Other(i32),
}

impl KmsError {
    /// Positive errno value of this error
    pub fn errno(self) -> i32 {
        match self {
            KmsError::NoEntry => 2,
            KmsError::BadDescriptor => 9,
            KmsError::OutOfMemory => 12,
            KmsError::Fault => 14,
            KmsError::Busy => 16,
            KmsError::InvalidArgument => 22,
            KmsError::NoSpace => 28,
            KmsError::OutOfRange => 34,
            KmsError::TimedOut => 110,
            KmsError::Other(code) => code,
        }
    }

    /// Negative return code as an ioctl reports it
    pub fn code(self) -> i32 {
        -self.errno()
    }

    /// Build an error from an errno value (sign is ignored)
    pub fn from_errno(errno: i32) -> Self {
        match errno.wrapping_abs() {
            2 => KmsError::NoEntry,
            9 => KmsError::BadDescriptor,
            12 => KmsError::OutOfMemory,
            14 => KmsError::Fault,
            16 => KmsError::Busy,
            22 => KmsError::InvalidArgument,
            28 => KmsError::NoSpace,
            34 => KmsError::OutOfRange,
            110 => KmsError::TimedOut,
            other => KmsError::Other(other),
        }
    }

    /// Taxonomy class of this error
    pub fn class(self) -> ErrorClass {
        match self {
            KmsError::NoEntry => ErrorClass::Referential,
            KmsError::InvalidArgument | KmsError::OutOfRange => ErrorClass::Argument,
            KmsError::Fault => ErrorClass::Fault,
            KmsError::NoSpace | KmsError::OutOfMemory => ErrorClass::Resource,
            KmsError::BadDescriptor | KmsError::Busy | KmsError::TimedOut | KmsError::Other(_) => {
                ErrorClass::Other
            }
        }
    }
}

/// Signed return code of a submission: `0` on success, `-errno` on failure
pub fn return_code(result: &KmsResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_round_trip_for_named_variants() {
        for err in [
            KmsError::NoEntry,
            KmsError::InvalidArgument,
            KmsError::OutOfRange,
            KmsError::Fault,
            KmsError::NoSpace,
            KmsError::OutOfMemory,
            KmsError::BadDescriptor,
            KmsError::Busy,
            KmsError::TimedOut,
        ] {
            assert_eq!(KmsError::from_errno(err.errno()), err);
            assert_eq!(KmsError::from_errno(err.code()), err);
        }
    }

    #[test]
    fn test_unknown_errno_is_preserved() {
        let err = KmsError::from_errno(-95);
        assert_eq!(err, KmsError::Other(95));
        assert_eq!(err.code(), -95);
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(KmsError::NoEntry.class(), ErrorClass::Referential);
        assert_eq!(KmsError::InvalidArgument.class(), ErrorClass::Argument);
        assert_eq!(KmsError::OutOfRange.class(), ErrorClass::Argument);
        assert_eq!(KmsError::Fault.class(), ErrorClass::Fault);
        assert_eq!(KmsError::NoSpace.class(), ErrorClass::Resource);
        assert_eq!(KmsError::TimedOut.class(), ErrorClass::Other);
    }

    #[test]
    fn test_error_display_names_errno() {
        assert!(KmsError::InvalidArgument.to_string().contains("EINVAL"));
        assert!(KmsError::Fault.to_string().contains("EFAULT"));
        assert!(KmsError::Other(5).to_string().contains('5'));
    }

    #[test]
    fn test_return_code() {
        assert_eq!(return_code(&Ok(())), 0);
        assert_eq!(return_code(&Err(KmsError::NoSpace)), -28);
    }
}
