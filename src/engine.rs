//! Engine Module
//!
//! [`WalDevice`] is the per-instance context: it owns both devices, the
//! indexes, the pipeline threads and the worker pools, and exposes the client
//! API of the virtual block device.
//!
//! ## Responsibilities
//! - Validate and admit client requests (range, alignment, size, read-only)
//! - Apply admission backpressure
//! - Route writes into the pipeline and reads onto the read pool
//! - Ordered drain on close

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::config::Config;
use crate::device::{check_range, BlockDevice};
use crate::error::{Result, WalError};
use crate::index::{PendingIndex, PendingStats};
use crate::io::{completion, BlockAllocator, Completion, HeapAllocator, ReadIo, WriteFlags, WriteIo, WriteKind};
use crate::backpressure::Backpressure;
use crate::logpack::{LogpackBuilder, RingGeometry};
use crate::pipeline::{read_strategy, Counters, Pipeline, PipelineStats, ReadStrategy, Shared, WorkerPool};
use crate::SECTOR_SIZE;

/// Snapshot of device state, for tests and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStats {
    pub pipeline: PipelineStats,
    pub overlap_len: usize,
    pub overlap_max_len: u64,
    pub pending: PendingStats,
    pub in_flight: usize,
    pub read_only: bool,
}

/// A write-ahead-logged virtual block device
///
/// ## Concurrency Model
///
/// - **Writes**: any number of client threads submit concurrently; one submit
///   thread batches them into logpacks, one log thread writes the packs in
///   LSID order, one wait thread acknowledges them once durable
/// - **Data device**: writes are applied by the data pool; intersecting writes
///   go in LSID order, everything else in parallel
/// - **Reads**: served by their own pool, never queued behind data writes
pub struct WalDevice {
    shared: Arc<Shared>,
    pipeline: Pipeline,
    read_pool: WorkerPool,
    strategy: Arc<dyn ReadStrategy>,
    /// Next write id; held while enqueueing so ids follow queue order
    next_id: Mutex<u64>,
    closing: AtomicBool,
    closed: bool,
}

impl WalDevice {
    /// Open a device over a log and a data device with heap header buffers
    pub fn open(config: Config, log: Arc<dyn BlockDevice>, data: Arc<dyn BlockDevice>) -> Result<Self> {
        Self::open_with_allocator(config, log, data, Arc::new(HeapAllocator))
    }

    /// Open with a custom logpack header allocator
    ///
    /// On open:
    /// 1. Validate config against both devices
    /// 2. Lay out the ring buffer
    /// 3. Start the data and read pools
    /// 4. Start the submit, log and wait threads
    pub fn open_with_allocator(
        config: Config,
        log: Arc<dyn BlockDevice>,
        data: Arc<dyn BlockDevice>,
        allocator: Arc<dyn BlockAllocator>,
    ) -> Result<Self> {
        // Step 1: Validate
        config.validate()?;
        if data.capacity_sectors() == 0 {
            return Err(WalError::Config("data device is empty".to_string()));
        }

        // Step 2: Ring layout
        let geometry = RingGeometry::from_config(&config, log.capacity_sectors())?;

        // Step 3: Indexes and pools
        let backpressure = Backpressure::new(
            config.max_pending_sectors,
            config.min_pending_sectors,
            Duration::from_millis(config.queue_stop_timeout_ms),
        );
        let pending = PendingIndex::new(backpressure);
        let strategy = read_strategy(config.read_strategy);
        let read_pool = WorkerPool::new("walblock-read", config.read_threads)?;
        let builder = LogpackBuilder::new(geometry, config.max_logpack_pb, config.initial_lsid, allocator);
        let shared = Arc::new(Shared::new(config, geometry, log, data, pending)?);

        // Step 4: Pipeline
        let pipeline = Pipeline::start(&shared, builder)?;

        tracing::info!(
            ring_buffer_size = geometry.ring_buffer_size(),
            block_size = geometry.block_size(),
            initial_lsid = shared.config.initial_lsid,
            data_sectors = shared.data.capacity_sectors(),
            read_strategy = strategy.name(),
            overlap_serialization = shared.config.overlap_serialization,
            "walblock device opened"
        );

        Ok(Self {
            shared,
            pipeline,
            read_pool,
            strategy,
            next_id: Mutex::new(1),
            closing: AtomicBool::new(false),
            closed: false,
        })
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Queue a write of `data` at sector `pos`
    ///
    /// The completion resolves once the write is durable in the log. An empty
    /// `data` with the flush flag is a pure durability barrier.
    pub fn submit_write(&self, pos: u64, data: Bytes, flags: WriteFlags) -> Result<Completion<()>> {
        check_range(self.capacity_sectors(), pos, data.len())?;
        if data.is_empty() && !flags.flush {
            return Err(WalError::EmptyRequest);
        }
        self.submit(pos, WriteKind::Data(data), flags)
    }

    /// Queue a discard of `sectors` sectors at `pos`
    pub fn submit_discard(&self, pos: u64, sectors: u32) -> Result<Completion<()>> {
        if sectors == 0 {
            return Err(WalError::EmptyRequest);
        }
        check_range(self.capacity_sectors(), pos, sectors as usize * SECTOR_SIZE)?;
        self.submit(pos, WriteKind::Discard { sectors }, WriteFlags::default())
    }

    /// Write `data` at `pos` and wait until it is durable in the log
    pub fn write(&self, pos: u64, data: &[u8]) -> Result<()> {
        self.write_with_flags(pos, data, WriteFlags::default())
    }

    pub fn write_with_flags(&self, pos: u64, data: &[u8], flags: WriteFlags) -> Result<()> {
        self.submit_write(pos, Bytes::copy_from_slice(data), flags)?.wait()
    }

    /// Discard a range and wait until the discard is logged
    pub fn discard(&self, pos: u64, sectors: u32) -> Result<()> {
        self.submit_discard(pos, sectors)?.wait()
    }

    /// Make every acknowledged write durable
    pub fn flush(&self) -> Result<()> {
        let flags = WriteFlags { flush: true, fua: false };
        self.submit_write(0, Bytes::new(), flags)?.wait()
    }

    fn submit(&self, pos: u64, kind: WriteKind, flags: WriteFlags) -> Result<Completion<()>> {
        self.check_writable()?;
        let sectors = match &kind {
            WriteKind::Data(data) => (data.len() / SECTOR_SIZE) as u64,
            WriteKind::Discard { .. } => 0,
        };
        let limit = self.shared.geometry.max_write_sectors();
        if sectors > limit {
            return Err(WalError::TooLarge { sectors, limit });
        }

        // Backpressure: stall while the pending index is over its watermark.
        self.shared.pending.wait_admission(self.shared.io_timeout());
        self.check_writable()?;

        let (ack, done) = completion("write acknowledgement", self.shared.io_timeout());
        let mut next_id = self.next_id.lock();
        let id = *next_id;
        let io = Arc::new(WriteIo::new(id, pos, kind, flags, Some(ack))?);
        *next_id += 1;
        tracing::trace!(id, pos, len = io.len(), flush = flags.flush, fua = flags.fua, "write admitted");

        self.shared.write_admitted();
        if let Err(io) = self.pipeline.enqueue(io) {
            self.shared.fail_write(&io, WalError::Closed);
        }
        Ok(done)
    }

    fn check_writable(&self) -> Result<()> {
        if self.closing.load(Ordering::Acquire) {
            return Err(WalError::Closed);
        }
        if self.shared.is_read_only() {
            return Err(WalError::ReadOnly);
        }
        Ok(())
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Queue a read of `sectors` sectors at `pos`
    pub fn submit_read(&self, pos: u64, sectors: u32) -> Result<Completion<Bytes>> {
        if self.closing.load(Ordering::Acquire) {
            return Err(WalError::Closed);
        }
        check_range(self.capacity_sectors(), pos, sectors as usize * SECTOR_SIZE)?;

        let (tx, done) = completion("read", self.shared.io_timeout());
        let shared = Arc::clone(&self.shared);
        let strategy = Arc::clone(&self.strategy);
        self.read_pool.execute(move || {
            let mut read = ReadIo::new(pos, sectors);
            let result = strategy.read(&shared, &mut read).map(|copied| {
                shared.counters.copied_sectors.fetch_add(copied, Ordering::Relaxed);
                Counters::bump(&shared.counters.reads_completed);
                read.into_bytes()
            });
            if let Err(e) = &result {
                tracing::warn!(pos, sectors, error = %e, "read failed");
            }
            tx.complete(result);
        });
        Ok(done)
    }

    /// Read `sectors` sectors at `pos`
    pub fn read(&self, pos: u64, sectors: u32) -> Result<Bytes> {
        self.submit_read(pos, sectors)?.wait()
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Drain every queued and in-flight write, then stop all threads
    pub fn close(mut self) -> Result<()> {
        self.shutdown();
        if self.shared.is_read_only() {
            return Err(WalError::ReadOnly);
        }
        Ok(())
    }

    /// Ordered drain: stop admission, drain submit, log and wait threads,
    /// wait for data I/O and GC, then stop the pools.
    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.closing.store(true, Ordering::Release);
        self.pipeline.stop();
        self.shared.wait_idle();
        self.shared.data_pool.shutdown();
        self.read_pool.shutdown();
        let stats = self.stats();
        tracing::info!(
            latest_lsid = stats.pipeline.latest_lsid,
            packs = stats.pipeline.packs_created,
            acked = stats.pipeline.writes_acked,
            failed = stats.pipeline.writes_failed,
            read_only = stats.read_only,
            "walblock device closed"
        );
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Capacity of the virtual device in sectors
    pub fn capacity_sectors(&self) -> u64 {
        self.shared.data.capacity_sectors()
    }

    /// Largest single write in sectors
    pub fn max_write_sectors(&self) -> u64 {
        self.shared.geometry.max_write_sectors()
    }

    pub fn is_read_only(&self) -> bool {
        self.shared.is_read_only()
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn geometry(&self) -> &RingGeometry {
        &self.shared.geometry
    }

    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            pipeline: self.shared.counters.snapshot(),
            overlap_len: self.shared.overlap.len(),
            overlap_max_len: self.shared.overlap.max_len(),
            pending: self.shared.pending.stats(),
            in_flight: self.shared.in_flight(),
            read_only: self.shared.is_read_only(),
        }
    }
}

impl Drop for WalDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}
