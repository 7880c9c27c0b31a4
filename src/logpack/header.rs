//! Logpack header block
//!
//! ## Layout (little-endian, one physical block)
//! ```text
//! ┌──────────────┬──────────┬───────────┬───────────┬──────────┐
//! │ Checksum (4) │ Type (2) │ NRec (2)  │ NPad (2)  │ Rsvd (2) │
//! ├──────────────┴──────────┴───────────┴───────────┴──────────┤
//! │ TotalIoSize (4)  │ LogpackLsid (8)                          │
//! ├────────────────────────────────────────────────────────────┤
//! │ Record[0..NRec] (32 bytes each)                             │
//! │  Checksum (4) | Flags (4) | Offset (8) | IoSize (4) |       │
//! │  Rsvd (4) | LsidLocal (8)                                   │
//! ├────────────────────────────────────────────────────────────┤
//! │ zero fill to the end of the block                           │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The checksum is a salted CRC32 of the whole block computed with the
//! checksum field zeroed, so a block verifies when recomputing it yields the
//! stored value.

use crate::error::{Result, WalError};
use crate::io::checksum;

/// Sector type tag of a logpack header ("LP")
pub const SECTOR_TYPE_LOGPACK: u16 = 0x4c50;

/// Bytes before the record array
pub const HEADER_FIXED_SIZE: usize = 24;

/// Bytes per record
pub const RECORD_SIZE: usize = 32;

const FLAG_EXIST: u32 = 1 << 0;
const FLAG_PADDING: u32 = 1 << 1;
const FLAG_DISCARD: u32 = 1 << 2;

/// Records that fit in one header block of `block_size` bytes
pub fn max_records(block_size: u32) -> usize {
    (block_size as usize).saturating_sub(HEADER_FIXED_SIZE) / RECORD_SIZE
}

/// Physical blocks needed for `sectors` logical sectors
pub fn capacity_pb(sectors: u32, sectors_per_block: u32) -> u64 {
    u64::from(sectors).div_ceil(u64::from(sectors_per_block))
}

/// One entry of the record array
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRecord {
    /// Data-device sector of the write (0 for padding)
    pub offset: u64,
    /// Length in logical sectors
    pub io_size: u32,
    /// First block relative to the logpack LSID (the header is 0)
    pub lsid_local: u64,
    pub checksum: u32,
    pub is_exist: bool,
    pub is_padding: bool,
    pub is_discard: bool,
}

impl LogRecord {
    /// Absolute LSID of the record's first block
    pub fn lsid(&self, logpack_lsid: u64) -> u64 {
        logpack_lsid + self.lsid_local
    }

    /// Log blocks this record occupies
    pub fn capacity_pb(&self, sectors_per_block: u32) -> u64 {
        if self.is_discard {
            0
        } else {
            capacity_pb(self.io_size, sectors_per_block)
        }
    }

    fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.is_exist {
            flags |= FLAG_EXIST;
        }
        if self.is_padding {
            flags |= FLAG_PADDING;
        }
        if self.is_discard {
            flags |= FLAG_DISCARD;
        }
        flags
    }

    fn encode(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.checksum.to_le_bytes());
        out[4..8].copy_from_slice(&self.flags().to_le_bytes());
        out[8..16].copy_from_slice(&self.offset.to_le_bytes());
        out[16..20].copy_from_slice(&self.io_size.to_le_bytes());
        out[20..24].copy_from_slice(&0u32.to_le_bytes());
        out[24..32].copy_from_slice(&self.lsid_local.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        let flags = read_u32(buf, 4);
        Self {
            checksum: read_u32(buf, 0),
            offset: read_u64(buf, 8),
            io_size: read_u32(buf, 16),
            lsid_local: read_u64(buf, 24),
            is_exist: flags & FLAG_EXIST != 0,
            is_padding: flags & FLAG_PADDING != 0,
            is_discard: flags & FLAG_DISCARD != 0,
        }
    }
}

/// In-memory form of a logpack header block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogpackHeader {
    logpack_lsid: u64,
    /// Physical blocks of payload (padding included, header excluded)
    total_io_size: u32,
    n_padding: u16,
    records: Vec<LogRecord>,
    checksum: u32,
}

impl LogpackHeader {
    pub fn new(logpack_lsid: u64) -> Self {
        Self {
            logpack_lsid,
            total_io_size: 0,
            n_padding: 0,
            records: Vec::new(),
            checksum: 0,
        }
    }

    pub fn logpack_lsid(&self) -> u64 {
        self.logpack_lsid
    }

    pub fn total_io_size(&self) -> u32 {
        self.total_io_size
    }

    pub fn n_records(&self) -> usize {
        self.records.len()
    }

    pub fn n_padding(&self) -> u16 {
        self.n_padding
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Checksum stored by the last `encode`/`decode`
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// LSID of the following logpack.
    ///
    /// A record-less pack (lone zero-length flush) writes no header and
    /// consumes no log space.
    pub fn next_lsid(&self) -> u64 {
        if self.records.is_empty() && self.total_io_size == 0 {
            self.logpack_lsid
        } else {
            self.logpack_lsid + 1 + u64::from(self.total_io_size)
        }
    }

    pub(crate) fn push(&mut self, record: LogRecord, capacity_pb: u64) {
        if record.is_padding {
            self.n_padding += 1;
        }
        self.total_io_size += capacity_pb as u32;
        self.records.push(record);
    }

    pub(crate) fn record_mut(&mut self, idx: usize) -> &mut LogRecord {
        &mut self.records[idx]
    }

    /// Serialize into `block` (the whole physical block) and stamp the
    /// checksum. Returns the checksum.
    pub fn encode(&mut self, block: &mut [u8], salt: u32) -> u32 {
        assert!(
            self.records.len() <= max_records(block.len() as u32),
            "logpack header overflow: {} records in {}-byte block",
            self.records.len(),
            block.len()
        );
        block.fill(0);
        block[4..6].copy_from_slice(&SECTOR_TYPE_LOGPACK.to_le_bytes());
        block[6..8].copy_from_slice(&(self.records.len() as u16).to_le_bytes());
        block[8..10].copy_from_slice(&self.n_padding.to_le_bytes());
        block[12..16].copy_from_slice(&self.total_io_size.to_le_bytes());
        block[16..24].copy_from_slice(&self.logpack_lsid.to_le_bytes());
        for (i, record) in self.records.iter().enumerate() {
            let start = HEADER_FIXED_SIZE + i * RECORD_SIZE;
            record.encode(&mut block[start..start + RECORD_SIZE]);
        }
        self.checksum = checksum(block, salt);
        block[0..4].copy_from_slice(&self.checksum.to_le_bytes());
        self.checksum
    }

    /// Parse and verify a header block.
    pub fn decode(block: &[u8], salt: u32, sectors_per_block: u32) -> Result<Self> {
        if block.len() < HEADER_FIXED_SIZE {
            return Err(WalError::Corruption(format!(
                "header block too small: {} bytes",
                block.len()
            )));
        }
        let sector_type = read_u16(block, 4);
        if sector_type != SECTOR_TYPE_LOGPACK {
            return Err(WalError::Corruption(format!(
                "bad sector type 0x{sector_type:04x}"
            )));
        }
        if !Self::verify_block(block, salt) {
            return Err(WalError::Corruption("header checksum mismatch".to_string()));
        }

        let n_records = read_u16(block, 6) as usize;
        if n_records > max_records(block.len() as u32) {
            return Err(WalError::Corruption(format!(
                "record count {n_records} exceeds header capacity"
            )));
        }
        let records: Vec<LogRecord> = (0..n_records)
            .map(|i| {
                let start = HEADER_FIXED_SIZE + i * RECORD_SIZE;
                LogRecord::decode(&block[start..start + RECORD_SIZE])
            })
            .collect();

        let header = Self {
            checksum: read_u32(block, 0),
            n_padding: read_u16(block, 8),
            total_io_size: read_u32(block, 12),
            logpack_lsid: read_u64(block, 16),
            records,
        };
        header.check_consistency(sectors_per_block)?;
        Ok(header)
    }

    /// True if the block's stored checksum matches its contents.
    pub fn verify_block(block: &[u8], salt: u32) -> bool {
        if block.len() < 4 {
            return false;
        }
        let stored = read_u32(block, 0);
        let mut hasher = crc32fast::Hasher::new_with_initial(salt);
        hasher.update(&[0u8; 4]);
        hasher.update(&block[4..]);
        hasher.finalize() == stored
    }

    /// Record capacities add up to `total_io_size` and padding is counted.
    pub fn check_consistency(&self, sectors_per_block: u32) -> Result<()> {
        let total: u64 = self
            .records
            .iter()
            .map(|r| r.capacity_pb(sectors_per_block))
            .sum();
        if total != u64::from(self.total_io_size) {
            return Err(WalError::Corruption(format!(
                "record capacity {total} != total_io_size {}",
                self.total_io_size
            )));
        }
        let padding = self.records.iter().filter(|r| r.is_padding).count();
        if padding != self.n_padding as usize {
            return Err(WalError::Corruption(format!(
                "padding records {padding} != n_padding {}",
                self.n_padding
            )));
        }
        if self.records.last().is_some_and(|r| r.is_padding) {
            return Err(WalError::Corruption("padding record is last".to_string()));
        }
        Ok(())
    }
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}
