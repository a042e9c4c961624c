//! Client address space
//!
//! Atomic requests reference their arrays and out-fence slots by address.
//! `UserMemory` models the client's address space those addresses point
//! into: page-granular mappings with protection bits, separated by unmapped
//! guard pages so an access that runs off the end of a mapping faults.
//! Address 0 is never mapped.
//!
//! Every access is bounds-checked with checked arithmetic; anything that is
//! not fully inside one mapping with the right protection is `EFAULT`.

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use kmsprobe_core::{KmsError, KmsResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Mapping granularity
pub const PAGE_SIZE: u64 = 4096;

/// Lowest address handed out
const BASE_ADDRESS: u64 = 0x1_0000;

bitflags! {
    /// Access rights of a mapping
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Protection: u32 {
        /// Readable
        const READ = 1 << 0;
        /// Writable
        const WRITE = 1 << 1;
        /// Executable
        const EXEC = 1 << 2;
    }
}

impl Protection {
    /// No access at all
    pub const NONE: Protection = Protection::empty();
    /// Read and write
    pub const READ_WRITE: Protection = Protection::READ.union(Protection::WRITE);
}

#[derive(Debug)]
struct Region {
    data: Vec<u8>,
    prot: Protection,
}

#[derive(Debug)]
struct Inner {
    regions: BTreeMap<u64, Region>,
    next: u64,
}

impl Inner {
    fn region(
        &mut self,
        addr: u64,
        len: usize,
        need: Protection,
    ) -> KmsResult<(&mut Region, usize)> {
        let end = addr.checked_add(len as u64).ok_or(KmsError::Fault)?;
        let (&base, region) = self
            .regions
            .range_mut(..=addr)
            .next_back()
            .ok_or(KmsError::Fault)?;
        let region_end = base + region.data.len() as u64;
        if end > region_end || !region.prot.contains(need) {
            return Err(KmsError::Fault);
        }
        Ok((region, (addr - base) as usize))
    }
}

/// Simulated client address space, cheap to clone (clones share mappings)
#[derive(Debug, Clone)]
pub struct UserMemory {
    inner: Arc<Mutex<Inner>>,
}

impl Default for UserMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl UserMemory {
    /// Empty address space
    pub fn new() -> Self {
        UserMemory {
            inner: Arc::new(Mutex::new(Inner {
                regions: BTreeMap::new(),
                next: BASE_ADDRESS,
            })),
        }
    }

    /// Map `len` zeroed bytes (rounded up to pages); returns the base address
    pub fn map(&self, len: usize, prot: Protection) -> KmsResult<u64> {
        if len == 0 {
            return Err(KmsError::InvalidArgument);
        }
        let pages = (len as u64).div_ceil(PAGE_SIZE);
        let size = pages.checked_mul(PAGE_SIZE).ok_or(KmsError::OutOfMemory)?;
        let mut inner = self.inner.lock();
        let base = inner.next;
        inner.next = base
            .checked_add(size + PAGE_SIZE)
            .ok_or(KmsError::OutOfMemory)?;
        inner.regions.insert(
            base,
            Region {
                data: vec![0; size as usize],
                prot,
            },
        );
        Ok(base)
    }

    /// Map and return a guard that unmaps on drop
    pub fn map_guarded(&self, len: usize, prot: Protection) -> KmsResult<Mapping> {
        let addr = self.map(len, prot)?;
        Ok(Mapping {
            memory: self.clone(),
            addr,
            len,
        })
    }

    /// Remove the mapping starting at `addr`
    pub fn unmap(&self, addr: u64) -> KmsResult<()> {
        self.inner
            .lock()
            .regions
            .remove(&addr)
            .map(|_| ())
            .ok_or(KmsError::InvalidArgument)
    }

    /// Change the protection of the mapping starting at `addr`
    pub fn protect(&self, addr: u64, prot: Protection) -> KmsResult<()> {
        let mut inner = self.inner.lock();
        let region = inner
            .regions
            .get_mut(&addr)
            .ok_or(KmsError::InvalidArgument)?;
        region.prot = prot;
        Ok(())
    }

    /// Number of live mappings
    pub fn mapping_count(&self) -> usize {
        self.inner.lock().regions.len()
    }

    /// Copy bytes out of the address space
    pub fn read(&self, addr: u64, buf: &mut [u8]) -> KmsResult<()> {
        let mut inner = self.inner.lock();
        let (region, offset) = inner.region(addr, buf.len(), Protection::READ)?;
        buf.copy_from_slice(&region.data[offset..offset + buf.len()]);
        Ok(())
    }

    /// Copy bytes into the address space
    pub fn write(&self, addr: u64, data: &[u8]) -> KmsResult<()> {
        let mut inner = self.inner.lock();
        let (region, offset) = inner.region(addr, data.len(), Protection::WRITE)?;
        region.data[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Read one little-endian u32
    pub fn read_u32(&self, addr: u64) -> KmsResult<u32> {
        let mut buf = [0u8; 4];
        self.read(addr, &mut buf)?;
        Ok(LittleEndian::read_u32(&buf))
    }

    /// Read one little-endian u64
    pub fn read_u64(&self, addr: u64) -> KmsResult<u64> {
        let mut buf = [0u8; 8];
        self.read(addr, &mut buf)?;
        Ok(LittleEndian::read_u64(&buf))
    }

    /// Read one little-endian i32
    pub fn read_i32(&self, addr: u64) -> KmsResult<i32> {
        Ok(self.read_u32(addr)? as i32)
    }

    /// Write one little-endian i32
    pub fn write_i32(&self, addr: u64, value: i32) -> KmsResult<()> {
        let mut buf = [0u8; 4];
        LittleEndian::write_i32(&mut buf, value);
        self.write(addr, &buf)
    }

    /// Write a packed little-endian u32 array
    pub fn write_u32s(&self, addr: u64, values: &[u32]) -> KmsResult<()> {
        let mut buf = vec![0u8; values.len() * 4];
        LittleEndian::write_u32_into(values, &mut buf);
        self.write(addr, &buf)
    }

    /// Write a packed little-endian u64 array
    pub fn write_u64s(&self, addr: u64, values: &[u64]) -> KmsResult<()> {
        let mut buf = vec![0u8; values.len() * 8];
        LittleEndian::write_u64_into(values, &mut buf);
        self.write(addr, &buf)
    }
}

/// Mapping that is removed when dropped
#[derive(Debug)]
pub struct Mapping {
    memory: UserMemory,
    addr: u64,
    len: usize,
}

impl Mapping {
    /// Base address
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Requested length
    pub fn len(&self) -> usize {
        self.len
    }

    /// Never true; mappings have at least one byte
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        let _ = self.memory.unmap(self.addr);
    }
}
