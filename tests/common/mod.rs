//! Shared helpers for walblock integration tests

#![allow(dead_code)]

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use walblock::device::{BlockDevice, MemoryDevice};
use walblock::error::{Result, WalError};
use walblock::io::BlockAllocator;
use walblock::{Config, WalDevice, SECTOR_SIZE};

// =============================================================================
// Test Device
// =============================================================================

/// Memory device that records writes, can hold writes to a sector range
/// until released, and can be told to fail.
pub struct TestDevice {
    inner: MemoryDevice,
    writes: Mutex<Vec<(u64, u64, u8)>>,
    gate: Mutex<Option<Range<u64>>>,
    gate_cond: Condvar,
    blocked: AtomicUsize,
    fail_writes: AtomicBool,
    fail_next: AtomicUsize,
}

impl TestDevice {
    pub fn new(capacity_sectors: u64) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryDevice::new(capacity_sectors),
            writes: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
            gate_cond: Condvar::new(),
            blocked: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
        })
    }

    pub fn inner(&self) -> &MemoryDevice {
        &self.inner
    }

    /// Hold every write intersecting `range` until `release`.
    pub fn hold(&self, range: Range<u64>) {
        *self.gate.lock() = Some(range);
    }

    pub fn release(&self) {
        *self.gate.lock() = None;
        self.gate_cond.notify_all();
    }

    /// Writes currently parked at the gate
    pub fn blocked(&self) -> usize {
        self.blocked.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail only the next `count` writes that get past the gate.
    pub fn fail_next_writes(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.fail_writes.load(Ordering::SeqCst)
            || self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
    }

    /// `(sector, sectors, first byte)` of every completed write, in order
    pub fn writes(&self) -> Vec<(u64, u64, u8)> {
        self.writes.lock().clone()
    }

    fn wait_gate(&self, sector: u64, sectors: u64) {
        let mut gate = self.gate.lock();
        let held = |g: &Option<Range<u64>>| {
            g.as_ref()
                .is_some_and(|r| sector < r.end && r.start < sector + sectors)
        };
        if !held(&*gate) {
            return;
        }
        self.blocked.fetch_add(1, Ordering::SeqCst);
        while held(&*gate) {
            self.gate_cond.wait(&mut gate);
        }
        self.blocked.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BlockDevice for TestDevice {
    fn capacity_sectors(&self) -> u64 {
        self.inner.capacity_sectors()
    }

    fn read_at(&self, sector: u64, buf: &mut [u8]) -> Result<()> {
        self.inner.read_at(sector, buf)
    }

    fn write_at(&self, sector: u64, buf: &[u8]) -> Result<()> {
        let sectors = (buf.len() / SECTOR_SIZE) as u64;
        self.wait_gate(sector, sectors);
        if self.take_failure() {
            return Err(WalError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        self.inner.write_at(sector, buf)?;
        self.writes
            .lock()
            .push((sector, sectors, buf.first().copied().unwrap_or(0)));
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.inner.flush()
    }
}

// =============================================================================
// Allocators
// =============================================================================

/// Fails the first `failures` allocations, then behaves like the heap
pub struct FlakyAllocator {
    failures: AtomicUsize,
}

impl FlakyAllocator {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicUsize::new(failures),
        })
    }
}

impl BlockAllocator for FlakyAllocator {
    fn allocate(&self, len: usize) -> Result<Vec<u8>> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(WalError::Alloc(len));
        }
        Ok(vec![0u8; len])
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// 512-byte blocks keep ring arithmetic small in tests
pub fn small_config() -> Config {
    Config::builder()
        .physical_block_size(512)
        .io_wait_timeout_ms(200)
        .data_io_threads(4)
        .read_threads(2)
        .build()
}

pub fn sectors(count: usize, fill: u8) -> Vec<u8> {
    vec![fill; count * SECTOR_SIZE]
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Wait until every admitted write reached a final state.
pub fn wait_idle(device: &WalDevice) {
    assert!(
        wait_until(Duration::from_secs(10), || device.stats().in_flight == 0),
        "device never drained: {:?}",
        device.stats()
    );
}
