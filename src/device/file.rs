//! File-backed block device
//!
//! Uses positional reads and writes (`FileExt`), so no shared seek position
//! is needed and the handle can be used from every worker thread at once.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::error::Result;
use crate::SECTOR_SIZE;

use super::{check_range, BlockDevice};

/// Block device stored in a regular file or block special file
#[derive(Debug)]
pub struct FileDevice {
    file: File,
    capacity: u64,
}

impl FileDevice {
    /// Open an existing file; capacity is its length rounded down to sectors
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let capacity = file.metadata()?.len() / SECTOR_SIZE as u64;
        Ok(Self { file, capacity })
    }

    /// Create (or truncate) a file sized to `capacity_sectors`
    pub fn create(path: &Path, capacity_sectors: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(capacity_sectors * SECTOR_SIZE as u64)?;
        Ok(Self {
            file,
            capacity: capacity_sectors,
        })
    }
}

impl BlockDevice for FileDevice {
    fn capacity_sectors(&self) -> u64 {
        self.capacity
    }

    fn read_at(&self, sector: u64, buf: &mut [u8]) -> Result<()> {
        check_range(self.capacity, sector, buf.len())?;
        self.file.read_exact_at(buf, sector * SECTOR_SIZE as u64)?;
        Ok(())
    }

    fn write_at(&self, sector: u64, buf: &[u8]) -> Result<()> {
        check_range(self.capacity, sector, buf.len())?;
        self.file.write_all_at(buf, sector * SECTOR_SIZE as u64)?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
