//! Pipeline counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters bumped by the pipeline stages
#[derive(Debug, Default)]
pub struct Counters {
    /// LSID the next logpack opens at
    pub latest_lsid: AtomicU64,
    /// Log durable up to (exclusive) this LSID
    pub completed_lsid: AtomicU64,
    pub packs_created: AtomicU64,
    pub packs_freed: AtomicU64,
    pub writes_acked: AtomicU64,
    pub writes_failed: AtomicU64,
    pub writes_applied: AtomicU64,
    pub writes_delayed: AtomicU64,
    pub reads_completed: AtomicU64,
    pub copied_sectors: AtomicU64,
}

impl Counters {
    pub fn new(initial_lsid: u64) -> Self {
        let counters = Self::default();
        counters.latest_lsid.store(initial_lsid, Ordering::Relaxed);
        counters.completed_lsid.store(initial_lsid, Ordering::Relaxed);
        counters
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineStats {
            latest_lsid: load(&self.latest_lsid),
            completed_lsid: load(&self.completed_lsid),
            packs_created: load(&self.packs_created),
            packs_freed: load(&self.packs_freed),
            writes_acked: load(&self.writes_acked),
            writes_failed: load(&self.writes_failed),
            writes_applied: load(&self.writes_applied),
            writes_delayed: load(&self.writes_delayed),
            reads_completed: load(&self.reads_completed),
            copied_sectors: load(&self.copied_sectors),
        }
    }
}

/// Point-in-time copy of [`Counters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub latest_lsid: u64,
    pub completed_lsid: u64,
    pub packs_created: u64,
    pub packs_freed: u64,
    pub writes_acked: u64,
    pub writes_failed: u64,
    pub writes_applied: u64,
    pub writes_delayed: u64,
    pub reads_completed: u64,
    pub copied_sectors: u64,
}
