//! Block Device Module
//!
//! The two underlying devices of a walblock instance (log and data) are
//! reached through the [`BlockDevice`] trait.
//!
//! ## Addressing
//! All offsets are in 512-byte logical sectors and every buffer length is a
//! whole number of sectors. Methods are synchronous; the pipeline runs them on
//! its own worker threads and turns their results into completions.

mod file;
mod memory;

pub use file::FileDevice;
pub use memory::MemoryDevice;

use crate::error::{Result, WalError};
use crate::SECTOR_SIZE;

/// Sector-addressed I/O interface
pub trait BlockDevice: Send + Sync {
    /// Total number of 512-byte sectors.
    fn capacity_sectors(&self) -> u64;

    /// Read exactly `buf.len()` bytes starting at `sector`.
    fn read_at(&self, sector: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all of `buf` starting at `sector`.
    fn write_at(&self, sector: u64, buf: &[u8]) -> Result<()>;

    /// Drop the contents of a range. The default zero-fills it.
    fn discard(&self, sector: u64, sectors: u32) -> Result<()> {
        const ZERO_CHUNK_SECTORS: u32 = 256;
        let zeros = vec![0u8; ZERO_CHUNK_SECTORS as usize * SECTOR_SIZE];
        let mut done = 0u32;
        while done < sectors {
            let n = (sectors - done).min(ZERO_CHUNK_SECTORS);
            self.write_at(sector + u64::from(done), &zeros[..n as usize * SECTOR_SIZE])?;
            done += n;
        }
        Ok(())
    }

    /// Flush volatile caches to stable storage.
    fn flush(&self) -> Result<()>;
}

/// Validate a request against a device capacity.
pub(crate) fn check_range(capacity: u64, sector: u64, len_bytes: usize) -> Result<()> {
    if len_bytes % SECTOR_SIZE != 0 {
        return Err(WalError::Misaligned {
            len: len_bytes,
            unit: SECTOR_SIZE,
        });
    }
    let sectors = (len_bytes / SECTOR_SIZE) as u64;
    match sector.checked_add(sectors) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(WalError::OutOfRange {
            sector,
            sectors,
            capacity,
        }),
    }
}
