//! Request array placement
//!
//! Atomic requests carry four arrays by address. Each array gets its own
//! mapping and is written flush against the mapping's end, so reading one
//! element past it runs into the unmapped guard page and faults. Overflow
//! probes depend on this.

use byteorder::{ByteOrder, LittleEndian};
use kmsprobe_core::{AtomicFlags, AtomicRequest, KmsResult};
use kmsprobe_device::{Mapping, Protection, UserMemory, PAGE_SIZE};

/// Array written into client memory, unmapped on drop
#[derive(Debug)]
pub struct PlacedArray {
    mapping: Mapping,
    addr: u64,
}

impl PlacedArray {
    /// Address of the first element
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Address one past the last element
    pub fn end(&self) -> u64 {
        let rounded = (self.mapping.len() as u64).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        self.mapping.addr() + rounded
    }
}

/// Map a fresh region and place `bytes` flush against its end
pub fn place(mem: &UserMemory, bytes: &[u8]) -> KmsResult<PlacedArray> {
    let mapping = mem.map_guarded(bytes.len().max(1), Protection::READ_WRITE)?;
    let rounded = (mapping.len() as u64).div_ceil(PAGE_SIZE) * PAGE_SIZE;
    let addr = mapping.addr() + rounded - bytes.len() as u64;
    if !bytes.is_empty() {
        mem.write(addr, bytes)?;
    }
    Ok(PlacedArray { mapping, addr })
}

/// Place a packed u32 array
pub fn place_u32s(mem: &UserMemory, values: &[u32]) -> KmsResult<PlacedArray> {
    let mut bytes = vec![0u8; values.len() * 4];
    LittleEndian::write_u32_into(values, &mut bytes);
    place(mem, &bytes)
}

/// Place a packed u64 array
pub fn place_u64s(mem: &UserMemory, values: &[u64]) -> KmsResult<PlacedArray> {
    let mut bytes = vec![0u8; values.len() * 8];
    LittleEndian::write_u64_into(values, &mut bytes);
    place(mem, &bytes)
}

/// The four arrays of one atomic request
#[derive(Debug)]
pub struct RequestArrays {
    /// Object ids
    pub objs: PlacedArray,
    /// Property count per object
    pub counts: PlacedArray,
    /// Property ids, all objects back to back
    pub props: PlacedArray,
    /// Values, parallel to `props`
    pub values: PlacedArray,
    count_objs: u32,
}

impl RequestArrays {
    /// Place all four arrays
    pub fn new(
        mem: &UserMemory,
        objs: &[u32],
        counts: &[u32],
        props: &[u32],
        values: &[u64],
    ) -> KmsResult<Self> {
        Ok(RequestArrays {
            objs: place_u32s(mem, objs)?,
            counts: place_u32s(mem, counts)?,
            props: place_u32s(mem, props)?,
            values: place_u64s(mem, values)?,
            count_objs: objs.len() as u32,
        })
    }

    /// Request header pointing at the placed arrays
    pub fn request(&self, flags: AtomicFlags, user_data: u64) -> AtomicRequest {
        AtomicRequest {
            flags: flags.bits(),
            count_objs: self.count_objs,
            objs_ptr: self.objs.addr(),
            count_props_ptr: self.counts.addr(),
            props_ptr: self.props.addr(),
            prop_values_ptr: self.values.addr(),
            reserved: 0,
            user_data,
        }
    }
}
