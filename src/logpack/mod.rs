//! Logpack Module
//!
//! A logpack is one header block followed by the payload blocks of the writes
//! it records, laid out contiguously in the log device's ring buffer.
//!
//! ## Ring Layout
//! ```text
//!  ring_buffer_offset
//!  │
//!  ▼
//!  ┌────────┬─────┬─────┬────────┬─────┬─────┬─────┬─────────┐
//!  │ hdr@N  │ r0  │ r1  │ hdr@N+3│ pad │ r0  │ r0  │  ...    │
//!  └────────┴─────┴─────┴────────┴─────┴─────┴─────┴─────────┘
//!  physical block = ring_buffer_offset + lsid % ring_buffer_size
//! ```
//!
//! LSIDs count physical blocks and only grow. A record never wraps: when its
//! blocks would cross the end of the ring, a padding record fills the tail
//! and the record starts again at block 0 of the ring.
//!
//! ## Responsibilities
//! - `header`: on-disk header format and checksum
//! - `pack`: runtime pack with members and lifecycle
//! - `builder`: batching writes into packs and assigning LSIDs

mod builder;
mod header;
mod pack;

pub use builder::LogpackBuilder;
pub use header::{
    capacity_pb, max_records, LogRecord, LogpackHeader, HEADER_FIXED_SIZE, RECORD_SIZE,
    SECTOR_TYPE_LOGPACK,
};
pub use pack::{Pack, PackMember, PackProgress, PackState};

use crate::config::Config;
use crate::error::{Result, WalError};
use crate::SECTOR_SIZE;

/// Placement of the ring buffer on the log device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingGeometry {
    block_size: u32,
    ring_buffer_offset: u64,
    ring_buffer_size: u64,
    salt: u32,
}

impl RingGeometry {
    /// `ring_buffer_offset` and `ring_buffer_size` are in physical blocks.
    pub fn new(block_size: u32, ring_buffer_offset: u64, ring_buffer_size: u64, salt: u32) -> Self {
        assert!(ring_buffer_size > 0, "empty ring buffer");
        Self {
            block_size,
            ring_buffer_offset,
            ring_buffer_size,
            salt,
        }
    }

    /// Resolve the configured ring against a log device of
    /// `log_capacity_sectors`.
    pub fn from_config(config: &Config, log_capacity_sectors: u64) -> Result<Self> {
        let spb = u64::from(config.sectors_per_block());
        let device_pb = log_capacity_sectors / spb;
        let offset = config.ring_buffer_offset;
        let size = match config.ring_buffer_size {
            0 => device_pb.saturating_sub(offset),
            n => n,
        };
        if size < 2 || offset + size > device_pb {
            return Err(WalError::Config(format!(
                "ring buffer [{offset}, {}) does not fit a log device of {device_pb} blocks",
                offset + size
            )));
        }
        Ok(Self::new(config.physical_block_size, offset, size, config.log_checksum_salt))
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn sectors_per_block(&self) -> u32 {
        self.block_size / SECTOR_SIZE as u32
    }

    /// Ring size in physical blocks
    pub fn ring_buffer_size(&self) -> u64 {
        self.ring_buffer_size
    }

    pub fn salt(&self) -> u32 {
        self.salt
    }

    /// Physical block holding `lsid`
    pub fn lsid_to_pb(&self, lsid: u64) -> u64 {
        self.ring_buffer_offset + lsid % self.ring_buffer_size
    }

    /// Log-device sector holding `lsid`
    pub fn lsid_to_sector(&self, lsid: u64) -> u64 {
        self.lsid_to_pb(lsid) * u64::from(self.sectors_per_block())
    }

    /// Records per header block
    pub fn max_records(&self) -> usize {
        max_records(self.block_size)
    }

    /// Largest write in physical blocks.
    ///
    /// Half the ring leaves room for the header and worst-case padding, so
    /// any admitted write fits in an empty pack.
    pub fn max_write_pb(&self) -> u64 {
        self.ring_buffer_size / 2
    }

    /// Largest write in logical sectors
    pub fn max_write_sectors(&self) -> u64 {
        self.max_write_pb() * u64::from(self.sectors_per_block())
    }
}
