//! Pending index
//!
//! Writes that are durable in the log but not yet applied to the data device.
//! Reads copy overlapping bytes out of these writes instead of waiting on the
//! data device. The index also owns the pending-sector counter and the
//! backpressure state, both guarded by its lock, and the condition variable
//! stalled writers sleep on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::backpressure::Backpressure;
use crate::io::{ReadIo, WriteIo};

use super::WriteMap;

/// Point-in-time view of the pending index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingStats {
    pub len: usize,
    pub max_len: u64,
    pub pending_sectors: u64,
    pub stopped: bool,
    pub stops: u64,
    /// Entries dropped early because a later write covered them
    pub overwritten: u64,
}

#[derive(Debug)]
struct PendingInner {
    map: WriteMap<Arc<WriteIo>>,
    pending_sectors: u64,
    backpressure: Backpressure,
    overwritten: u64,
}

/// Shadow index of logged, not yet applied writes
#[derive(Debug)]
pub struct PendingIndex {
    inner: Mutex<PendingInner>,
    admission: Condvar,
}

/// Sectors a write holds in memory while pending. Discards hold none.
fn weight(io: &WriteIo) -> u64 {
    if io.is_discard() {
        0
    } else {
        u64::from(io.len())
    }
}

impl PendingIndex {
    pub fn new(backpressure: Backpressure) -> Self {
        Self {
            inner: Mutex::new(PendingInner {
                map: WriteMap::default(),
                pending_sectors: 0,
                backpressure,
                overwritten: 0,
            }),
            admission: Condvar::new(),
        }
    }

    // =========================================================================
    // Write Side
    // =========================================================================

    /// Index a freshly logged write. With `prune`, older entries whose range
    /// lies inside `io` are dropped first. Returns true if this insert stopped
    /// admission.
    pub fn insert(&self, io: &Arc<WriteIo>, prune: bool) -> bool {
        assert!(!io.is_empty(), "zero-length write {} in pending index", io.id());
        let mut inner = self.inner.lock();
        if prune && Self::delete_fully_overwritten(&mut inner, io) > 0 {
            let pending = inner.pending_sectors;
            if inner.backpressure.should_restart(pending, Instant::now()) {
                self.admission.notify_all();
            }
        }
        inner.map.insert(io, Arc::clone(io));
        inner.pending_sectors += weight(io);
        let pending = inner.pending_sectors;
        inner.backpressure.should_stop(pending, Instant::now())
    }

    /// Drop entries that `io` completely covers. Their data-device writes go
    /// on; only reads stop seeing them. Returns the number dropped.
    fn delete_fully_overwritten(inner: &mut PendingInner, io: &WriteIo) -> usize {
        let covered: Vec<Arc<WriteIo>> = inner
            .map
            .intersecting(io.pos(), u64::from(io.len()))
            .map(|(_, old)| old)
            .filter(|old| old.id() != io.id() && old.is_covered_by(io.pos(), u64::from(io.len())))
            .cloned()
            .collect();
        let dropped = covered.len();
        for old in covered {
            assert!(
                old.lsid() <= io.lsid(),
                "write {} would prune newer write {}",
                io.id(),
                old.id()
            );
            inner.map.remove(&old);
            old.mark_overwritten();
            inner.pending_sectors -= weight(&old);
            inner.overwritten += 1;
            tracing::trace!(id = old.id(), by = io.id(), "pending entry overwritten");
        }
        dropped
    }

    /// Remove a write whose data-device I/O finished. Returns false if it had
    /// already been pruned as overwritten.
    pub fn remove(&self, io: &WriteIo) -> bool {
        let mut inner = self.inner.lock();
        if io.is_overwritten() {
            return false;
        }
        let removed = inner.map.remove(io);
        assert!(removed.is_some(), "write {} missing from pending index", io.id());
        inner.pending_sectors -= weight(io);
        let pending = inner.pending_sectors;
        if inner.backpressure.should_restart(pending, Instant::now()) {
            self.admission.notify_all();
        }
        true
    }

    /// Block while admission is stopped. Each wake re-checks the deadline,
    /// so a missed notification costs at most `poll`.
    pub fn wait_admission(&self, poll: Duration) {
        let mut inner = self.inner.lock();
        while inner.backpressure.is_stopped() {
            let now = Instant::now();
            let pending = inner.pending_sectors;
            if inner.backpressure.should_restart(pending, now) {
                self.admission.notify_all();
                break;
            }
            let wait = inner
                .backpressure
                .deadline()
                .map_or(poll, |d| d.saturating_duration_since(now).min(poll));
            self.admission.wait_for(&mut inner, wait);
        }
    }

    // =========================================================================
    // Read Side
    // =========================================================================

    /// Serve the parts of `read` covered by pending writes. Writes are applied
    /// oldest LSID first so the newest bytes win. Returns the distinct sectors
    /// copied.
    pub fn check_and_copy(&self, read: &mut ReadIo) -> u64 {
        if read.is_empty() {
            return 0;
        }
        let pos = read.pos();
        let end = pos + u64::from(read.len());
        let inner = self.inner.lock();
        let mut hits: Vec<&Arc<WriteIo>> = inner
            .map
            .intersecting(pos, end - pos)
            .map(|(_, io)| io)
            .collect();
        hits.sort_by_key(|io| (io.lsid(), io.id()));

        let uncovered = read.uncovered_sectors();
        for io in hits {
            let start = io.pos().max(pos);
            let stop = io.end().min(end);
            let range = read.fragments_mut().isolate(start, stop);
            for frag in read.fragments_mut().fragments_mut(range) {
                match io.payload() {
                    Some(data) => frag.copy_from(io.pos(), data),
                    None => frag.bytes_mut().fill(0),
                }
                frag.complete(Ok(()));
            }
        }
        drop(inner);
        let copied = uncovered - read.uncovered_sectors();
        read.add_copied(copied);
        copied
    }

    /// Pending writes intersecting `[pos, pos + len)`, oldest first
    pub fn overlapping(&self, pos: u64, len: u64) -> Vec<Arc<WriteIo>> {
        let inner = self.inner.lock();
        let mut hits: Vec<Arc<WriteIo>> = inner
            .map
            .intersecting(pos, len)
            .map(|(_, io)| Arc::clone(io))
            .collect();
        hits.sort_by_key(|io| (io.lsid(), io.id()));
        hits
    }

    // =========================================================================
    // Stats
    // =========================================================================

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().backpressure.is_stopped()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }

    pub fn pending_sectors(&self) -> u64 {
        self.inner.lock().pending_sectors
    }

    pub fn stats(&self) -> PendingStats {
        let inner = self.inner.lock();
        PendingStats {
            len: inner.map.len(),
            max_len: inner.map.max_len,
            pending_sectors: inner.pending_sectors,
            stopped: inner.backpressure.is_stopped(),
            stops: inner.backpressure.stops(),
            overwritten: inner.overwritten,
        }
    }
}
