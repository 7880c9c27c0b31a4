//! Configuration for walblock
//!
//! Centralized configuration with sensible defaults. Validated once when a
//! [`WalDevice`](crate::WalDevice) is opened.

use crate::error::{Result, WalError};
use crate::SECTOR_SIZE;

/// Main configuration for a walblock device instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Log Device Geometry
    // -------------------------------------------------------------------------
    /// Physical block size of the log device in bytes (power of two, >= 512).
    /// One logpack header occupies exactly one physical block.
    pub physical_block_size: u32,

    /// First physical block of the ring buffer on the log device
    pub ring_buffer_offset: u64,

    /// Ring buffer size in physical blocks (0 = rest of the log device)
    pub ring_buffer_size: u64,

    /// Salt mixed into every record and header checksum
    pub log_checksum_salt: u32,

    /// LSID of the first logpack written by this instance
    pub initial_lsid: u64,

    // -------------------------------------------------------------------------
    // Logpack Configuration
    // -------------------------------------------------------------------------
    /// Per-pack budget in physical blocks (0 = limited only by header capacity)
    pub max_logpack_pb: u32,

    /// Max queued writes the submit worker pulls into one batching round
    pub submit_batch: usize,

    // -------------------------------------------------------------------------
    // Backpressure Configuration
    // -------------------------------------------------------------------------
    /// High watermark: stop admission above this many pending sectors
    pub max_pending_sectors: u64,

    /// Low watermark: resume admission below this many pending sectors
    pub min_pending_sectors: u64,

    /// Max duration admission may stay stopped (milliseconds)
    pub queue_stop_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // I/O Configuration
    // -------------------------------------------------------------------------
    /// Log device chunk size in sectors (0 = no limit)
    pub log_chunk_sectors: u32,

    /// Data device chunk size in sectors (0 = no limit)
    pub data_chunk_sectors: u32,

    /// Worker threads for data-device writes and GC
    pub data_io_threads: usize,

    /// Worker threads for client reads
    pub read_threads: usize,

    /// Bounded wait on a completion before logging and retrying (milliseconds)
    pub io_wait_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Consistency Configuration
    // -------------------------------------------------------------------------
    /// How reads overlapping not-yet-applied writes are served
    pub read_strategy: ReadStrategyKind,

    /// Force intersecting writes to reach the data device in logpack order
    pub overlap_serialization: bool,
}

/// Read strategy selected once at device construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategyKind {
    /// Copy bytes of overlapping pending writes, read the rest from the device
    Fast,

    /// Wait for overlapping pending writes to reach the device, then read it
    DeviceThrough,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            physical_block_size: 4096,
            ring_buffer_offset: 0,
            ring_buffer_size: 0,
            log_checksum_salt: 0,
            initial_lsid: 0,
            max_logpack_pb: 256,                  // 1 MiB at 4 KiB blocks
            submit_batch: 128,
            max_pending_sectors: 64 * 1024 * 2,   // 64 MiB
            min_pending_sectors: 56 * 1024 * 2,   // 56 MiB
            queue_stop_timeout_ms: 100,
            log_chunk_sectors: 0,
            data_chunk_sectors: 0,
            data_io_threads: 4,
            read_threads: 2,
            io_wait_timeout_ms: 5000,
            read_strategy: ReadStrategyKind::Fast,
            overlap_serialization: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Logical sectors per physical block
    pub fn sectors_per_block(&self) -> u32 {
        self.physical_block_size / SECTOR_SIZE as u32
    }

    /// Check option consistency
    pub fn validate(&self) -> Result<()> {
        let pbs = self.physical_block_size;
        if pbs < SECTOR_SIZE as u32 || !pbs.is_power_of_two() {
            return Err(WalError::Config(format!(
                "physical_block_size={pbs} must be a power of two >= {SECTOR_SIZE}"
            )));
        }
        if self.min_pending_sectors > self.max_pending_sectors {
            return Err(WalError::Config(format!(
                "min_pending_sectors={} exceeds max_pending_sectors={}",
                self.min_pending_sectors, self.max_pending_sectors
            )));
        }
        if self.submit_batch == 0 {
            return Err(WalError::Config("submit_batch must be positive".to_string()));
        }
        if self.data_io_threads == 0 || self.read_threads == 0 {
            return Err(WalError::Config(
                "data_io_threads and read_threads must be positive".to_string(),
            ));
        }
        if self.io_wait_timeout_ms == 0 {
            return Err(WalError::Config("io_wait_timeout_ms must be positive".to_string()));
        }
        // Log I/O is issued in whole physical blocks, so its chunks must be too.
        let spb = self.sectors_per_block();
        let chunk = self.log_chunk_sectors;
        if chunk != 0 && chunk % spb != 0 {
            return Err(WalError::Config(format!(
                "log_chunk_sectors={chunk} must be a multiple of the physical block ({spb} sectors)"
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the log device physical block size (bytes)
    pub fn physical_block_size(mut self, size: u32) -> Self {
        self.config.physical_block_size = size;
        self
    }

    /// Set the ring buffer offset (physical blocks)
    pub fn ring_buffer_offset(mut self, pb: u64) -> Self {
        self.config.ring_buffer_offset = pb;
        self
    }

    /// Set the ring buffer size (physical blocks, 0 = rest of device)
    pub fn ring_buffer_size(mut self, pb: u64) -> Self {
        self.config.ring_buffer_size = pb;
        self
    }

    /// Set the checksum salt
    pub fn log_checksum_salt(mut self, salt: u32) -> Self {
        self.config.log_checksum_salt = salt;
        self
    }

    /// Set the first LSID
    pub fn initial_lsid(mut self, lsid: u64) -> Self {
        self.config.initial_lsid = lsid;
        self
    }

    /// Set the per-pack budget (physical blocks, 0 = unbounded)
    pub fn max_logpack_pb(mut self, pb: u32) -> Self {
        self.config.max_logpack_pb = pb;
        self
    }

    /// Set the submit batch size
    pub fn submit_batch(mut self, count: usize) -> Self {
        self.config.submit_batch = count;
        self
    }

    /// Set the high and low pending-sector watermarks
    pub fn pending_watermarks(mut self, high: u64, low: u64) -> Self {
        self.config.max_pending_sectors = high;
        self.config.min_pending_sectors = low;
        self
    }

    /// Set the admission stall timeout (milliseconds)
    pub fn queue_stop_timeout_ms(mut self, ms: u64) -> Self {
        self.config.queue_stop_timeout_ms = ms;
        self
    }

    /// Set the log device chunk size (sectors)
    pub fn log_chunk_sectors(mut self, sectors: u32) -> Self {
        self.config.log_chunk_sectors = sectors;
        self
    }

    /// Set the data device chunk size (sectors)
    pub fn data_chunk_sectors(mut self, sectors: u32) -> Self {
        self.config.data_chunk_sectors = sectors;
        self
    }

    /// Set the data I/O pool size
    pub fn data_io_threads(mut self, count: usize) -> Self {
        self.config.data_io_threads = count;
        self
    }

    /// Set the read pool size
    pub fn read_threads(mut self, count: usize) -> Self {
        self.config.read_threads = count;
        self
    }

    /// Set the bounded completion wait (milliseconds)
    pub fn io_wait_timeout_ms(mut self, ms: u64) -> Self {
        self.config.io_wait_timeout_ms = ms;
        self
    }

    /// Set the read strategy
    pub fn read_strategy(mut self, strategy: ReadStrategyKind) -> Self {
        self.config.read_strategy = strategy;
        self
    }

    /// Enable or disable overlap serialization
    pub fn overlap_serialization(mut self, enabled: bool) -> Self {
        self.config.overlap_serialization = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
