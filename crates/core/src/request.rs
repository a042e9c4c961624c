//! Atomic transaction request
//!
//! The request is the wire header of one transaction. It does not carry the
//! object/property arrays itself: it points at them inside the caller's
//! address space, and the device copies them in element by element.
//!
//! ```text
//! ┌───────────┬────────────┬──────────┬─────────────────┬───────────┐
//! │ flags (4) │ count (4)  │ objs (8) │ count_props (8) │ props (8) │
//! ├───────────┴──┬─────────┴──────┬───┴─────────────────┴───────────┘
//! │ values (8)   │ reserved (8)   │ user_data (8)
//! └──────────────┴────────────────┴──────────────
//! ```

use crate::error::{KmsError, KmsResult};
use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};

/// Encoded size of a request header
pub const ATOMIC_REQUEST_SIZE: usize = 56;

bitflags! {
    /// Transaction flags
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct AtomicFlags: u32 {
        /// Queue a completion event per pipeline
        const PAGE_FLIP_EVENT = 0x0001;
        /// Flip without waiting for vblank
        const PAGE_FLIP_ASYNC = 0x0002;
        /// Check the transaction, apply nothing
        const TEST_ONLY = 0x0100;
        /// Return before the transaction completes
        const NONBLOCK = 0x0200;
        /// Permit full mode changes
        const ALLOW_MODESET = 0x0400;
    }
}

/// Transaction header as submitted to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AtomicRequest {
    /// Raw flag bits, unknown bits included
    pub flags: u32,
    /// Number of objects
    pub count_objs: u32,
    /// Address of `count_objs` u32 object ids
    pub objs_ptr: u64,
    /// Address of `count_objs` u32 per-object property counts
    pub count_props_ptr: u64,
    /// Address of the flattened u32 property ids
    pub props_ptr: u64,
    /// Address of the flattened u64 values
    pub prop_values_ptr: u64,
    /// Must be zero
    pub reserved: u64,
    /// Returned verbatim in completion events
    pub user_data: u64,
}

impl AtomicRequest {
    /// Flag bits the device understands; `None` if unknown bits are set
    pub fn known_flags(&self) -> Option<AtomicFlags> {
        AtomicFlags::from_bits(self.flags)
    }

    /// Serialize the header
    pub fn to_bytes(&self) -> [u8; ATOMIC_REQUEST_SIZE] {
        let mut buf = [0u8; ATOMIC_REQUEST_SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.flags);
        LittleEndian::write_u32(&mut buf[4..8], self.count_objs);
        LittleEndian::write_u64(&mut buf[8..16], self.objs_ptr);
        LittleEndian::write_u64(&mut buf[16..24], self.count_props_ptr);
        LittleEndian::write_u64(&mut buf[24..32], self.props_ptr);
        LittleEndian::write_u64(&mut buf[32..40], self.prop_values_ptr);
        LittleEndian::write_u64(&mut buf[40..48], self.reserved);
        LittleEndian::write_u64(&mut buf[48..56], self.user_data);
        buf
    }

    /// Parse a header; any length but the exact size is rejected
    pub fn from_bytes(bytes: &[u8]) -> KmsResult<Self> {
        if bytes.len() != ATOMIC_REQUEST_SIZE {
            return Err(KmsError::InvalidArgument);
        }
        Ok(AtomicRequest {
            flags: LittleEndian::read_u32(&bytes[0..4]),
            count_objs: LittleEndian::read_u32(&bytes[4..8]),
            objs_ptr: LittleEndian::read_u64(&bytes[8..16]),
            count_props_ptr: LittleEndian::read_u64(&bytes[16..24]),
            props_ptr: LittleEndian::read_u64(&bytes[24..32]),
            prop_values_ptr: LittleEndian::read_u64(&bytes[32..40]),
            reserved: LittleEndian::read_u64(&bytes[40..48]),
            user_data: LittleEndian::read_u64(&bytes[48..56]),
        })
    }
}
