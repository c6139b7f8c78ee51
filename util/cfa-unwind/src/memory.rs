//! Bounds-checked views of target memory.

use gimli::{Endianity, RunTimeEndian};

use crate::error::{CfaError, Result};

/// Read access to a range of the target's address space.
///
/// Implementations must fail rather than return bytes outside what they
/// map; every CFA decode and register recovery goes through this trait.
pub trait MemoryView {
    /// Returns `len` bytes starting at `address`.
    fn read(&self, address: u64, len: usize) -> Result<&[u8]>;

    /// Reads one byte.
    fn read_u8(&self, address: u64) -> Result<u8> {
        Ok(self.read(address, 1)?[0])
    }

    /// Reads an unsigned value of `size` bytes (1, 2, 4 or 8).
    fn read_sized(&self, address: u64, size: usize, endian: RunTimeEndian) -> Result<u64> {
        let bytes = self.read(address, size)?;
        Ok(match size {
            1 => bytes[0] as u64,
            2 => endian.read_u16(bytes) as u64,
            4 => endian.read_u32(bytes) as u64,
            8 => endian.read_u64(bytes),
            _ => return Err(CfaError::BadOperand { address }),
        })
    }
}

impl<M: MemoryView + ?Sized> MemoryView for &M {
    fn read(&self, address: u64, len: usize) -> Result<&[u8]> {
        (**self).read(address, len)
    }
}

/// Two views tried in order, for instruction and stack bytes that live in
/// different mappings.
impl<A: MemoryView, B: MemoryView> MemoryView for (A, B) {
    fn read(&self, address: u64, len: usize) -> Result<&[u8]> {
        match self.0.read(address, len) {
            Err(CfaError::BadAddress { .. }) => self.1.read(address, len),
            other => other,
        }
    }
}

/// A byte slice that appears at `base` in the target's address space.
#[derive(Debug, Clone, Copy)]
pub struct SliceMemory<'a> {
    base: u64,
    bytes: &'a [u8],
}

impl<'a> SliceMemory<'a> {
    /// Maps `bytes` at `base`.
    pub const fn new(base: u64, bytes: &'a [u8]) -> Self {
        Self { base, bytes }
    }

    /// Views `len` bytes of this process's memory starting at `address`.
    ///
    /// # Safety
    ///
    /// The range must be readable and must stay unmodified for `'a`.
    pub unsafe fn from_raw_parts(address: usize, len: usize) -> Self {
        Self {
            base: address as u64,
            bytes: unsafe { core::slice::from_raw_parts(address as *const u8, len) },
        }
    }

    /// Address of the first mapped byte.
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Number of mapped bytes.
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether no bytes are mapped.
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl MemoryView for SliceMemory<'_> {
    fn read(&self, address: u64, len: usize) -> Result<&[u8]> {
        let bad = CfaError::BadAddress { address, len };
        let start = address.checked_sub(self.base).ok_or(bad)?;
        let start = usize::try_from(start).map_err(|_| bad)?;
        let end = start.checked_add(len).ok_or(bad)?;
        self.bytes.get(start..end).ok_or(bad)
    }
}
