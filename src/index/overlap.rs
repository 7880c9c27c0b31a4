//! Overlap index
//!
//! Serializes intersecting writes on the data device. Every write counts the
//! intersecting writes already indexed when it arrives; it may be submitted
//! only when that count is zero, and each removal decrements the writes that
//! counted it.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::io::WriteIo;

use super::{AsWrite, WriteMap};

#[derive(Debug)]
struct OverlapEntry {
    io: Arc<WriteIo>,
    /// Earlier intersecting writes still indexed
    overlapped: u32,
}

impl AsWrite for OverlapEntry {
    fn write(&self) -> &Arc<WriteIo> {
        &self.io
    }
}

/// Index forcing intersecting writes to reach the data device in LSID order
#[derive(Debug, Default)]
pub struct OverlapIndex {
    inner: Mutex<WriteMap<OverlapEntry>>,
}

impl OverlapIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `io`. Returns true if it may be submitted right away.
    pub fn insert(&self, io: &Arc<WriteIo>) -> bool {
        let mut map = self.inner.lock();
        let overlapped = map.intersecting(io.pos(), u64::from(io.len())).count() as u32;
        map.insert(
            io,
            OverlapEntry {
                io: Arc::clone(io),
                overlapped,
            },
        );
        tracing::trace!(id = io.id(), pos = io.pos(), len = io.len(), overlapped, "overlap insert");
        overlapped == 0
    }

    /// Remove `io` once it reached the data device and return the writes that
    /// became eligible, in index order.
    pub fn remove(&self, io: &WriteIo) -> Vec<Arc<WriteIo>> {
        let mut map = self.inner.lock();
        let entry = map.remove(io);
        let entry = match entry {
            Some(entry) => entry,
            None => panic!("write {} missing from overlap index", io.id()),
        };
        assert_eq!(
            entry.overlapped, 0,
            "write {} removed while still overlapped",
            io.id()
        );

        let mut ready = Vec::new();
        for (_, successor) in map.intersecting_mut(io.pos(), u64::from(io.len())) {
            assert!(
                successor.overlapped > 0,
                "write {} overlaps {} without counting it",
                successor.io.id(),
                io.id()
            );
            successor.overlapped -= 1;
            if successor.overlapped == 0 {
                ready.push(Arc::clone(&successor.io));
            }
        }
        ready
    }

    /// Overlap count of an indexed write
    pub fn overlapped(&self, io: &WriteIo) -> Option<u32> {
        let map = self.inner.lock();
        map.map.get(&super::key_of(io)).map(|e| e.overlapped)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Longest write indexed since the index was last empty
    pub fn max_len(&self) -> u64 {
        self.inner.lock().max_len
    }
}
