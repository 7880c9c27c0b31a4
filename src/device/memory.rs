//! In-memory block device
//!
//! Vec-backed simulator used by tests and the simulation binary.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::Result;
use crate::SECTOR_SIZE;

use super::{check_range, BlockDevice};

/// RAM-backed device
pub struct MemoryDevice {
    /// Device contents, `capacity * SECTOR_SIZE` bytes
    data: RwLock<Vec<u8>>,
    capacity: u64,
    writes: AtomicU64,
    flushes: AtomicU64,
}

impl MemoryDevice {
    /// Create a zero-filled device of `capacity_sectors` sectors
    pub fn new(capacity_sectors: u64) -> Self {
        Self {
            data: RwLock::new(vec![0u8; capacity_sectors as usize * SECTOR_SIZE]),
            capacity: capacity_sectors,
            writes: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }

    /// Copy out `sectors` sectors starting at `sector`
    pub fn snapshot(&self, sector: u64, sectors: u32) -> Vec<u8> {
        let start = sector as usize * SECTOR_SIZE;
        let end = start + sectors as usize * SECTOR_SIZE;
        self.data.read()[start..end].to_vec()
    }

    /// Number of `write_at` calls served
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of `flush` calls served
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl BlockDevice for MemoryDevice {
    fn capacity_sectors(&self) -> u64 {
        self.capacity
    }

    fn read_at(&self, sector: u64, buf: &mut [u8]) -> Result<()> {
        check_range(self.capacity, sector, buf.len())?;
        let start = sector as usize * SECTOR_SIZE;
        buf.copy_from_slice(&self.data.read()[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&self, sector: u64, buf: &[u8]) -> Result<()> {
        check_range(self.capacity, sector, buf.len())?;
        let start = sector as usize * SECTOR_SIZE;
        self.data.write()[start..start + buf.len()].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
