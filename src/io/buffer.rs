//! Block buffers and checksums
//!
//! Header blocks come from a [`BlockAllocator`] so an allocation failure can be
//! reported instead of aborting the process.

use crate::error::{Result, WalError};

/// Source of zero-filled block buffers
pub trait BlockAllocator: Send + Sync {
    /// Allocate `len` zeroed bytes, or fail without panicking.
    fn allocate(&self, len: usize) -> Result<Vec<u8>>;
}

/// Global-heap allocator using fallible reservation
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl BlockAllocator for HeapAllocator {
    fn allocate(&self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len).map_err(|_| WalError::Alloc(len))?;
        buf.resize(len, 0);
        Ok(buf)
    }
}

/// Salted CRC32 of `data`.
///
/// The salt seeds the hasher so logs written with a different salt never
/// verify against each other.
pub fn checksum(data: &[u8], salt: u32) -> u32 {
    let mut hasher = crc32fast::Hasher::new_with_initial(salt);
    hasher.update(data);
    hasher.finalize()
}
