//! Index Module
//!
//! Ordered in-memory indexes of in-flight writes.
//!
//! ## Responsibilities
//! - `OverlapIndex`: hold back a write until every earlier intersecting write
//!   has reached the data device
//! - `PendingIndex`: logged but not yet applied writes, consulted by reads,
//!   plus the pending-sector counter driving backpressure
//!
//! ## Data Structure Choice
//! Both sit on a `BTreeMap` keyed by `(start_sector, write_id)`:
//! - duplicate start sectors are allowed and come back in admission order
//! - a write can only intersect `[pos, end)` if it starts in
//!   `[pos - max_len, end)`, so every scan is a bounded range walk
//! - `max_len` only grows while the index is populated and resets to 0 once
//!   it drains

mod overlap;
mod pending;

pub use overlap::OverlapIndex;
pub use pending::{PendingIndex, PendingStats};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::io::WriteIo;

type Key = (u64, u64);

fn key_of(io: &WriteIo) -> Key {
    (io.pos(), io.id())
}

/// `BTreeMap` of writes with the bounded-scan bookkeeping shared by both
/// indexes
#[derive(Debug)]
struct WriteMap<V> {
    map: BTreeMap<Key, V>,
    max_len: u64,
}

impl<V> Default for WriteMap<V> {
    fn default() -> Self {
        Self {
            map: BTreeMap::new(),
            max_len: 0,
        }
    }
}

impl<V> WriteMap<V> {
    fn len(&self) -> usize {
        self.map.len()
    }

    fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn insert(&mut self, io: &WriteIo, value: V) {
        let prev = self.map.insert(key_of(io), value);
        assert!(prev.is_none(), "write {} indexed twice", io.id());
        self.max_len = self.max_len.max(u64::from(io.len()));
    }

    fn remove(&mut self, io: &WriteIo) -> Option<V> {
        let value = self.map.remove(&key_of(io));
        if self.map.is_empty() {
            self.max_len = 0;
        }
        value
    }

    /// Keys that may intersect `[pos, pos + len)`
    fn scan_bounds(&self, pos: u64, len: u64) -> std::ops::Range<Key> {
        (pos.saturating_sub(self.max_len), 0)..(pos + len, 0)
    }

    /// Entries intersecting `[pos, pos + len)`, in key order
    fn intersecting<'a>(
        &'a self,
        pos: u64,
        len: u64,
    ) -> impl Iterator<Item = (&'a Key, &'a V)> + 'a
    where
        V: AsWrite,
    {
        self.map
            .range(self.scan_bounds(pos, len))
            .filter(move |(_, v)| v.write().intersects(pos, len))
    }

    fn intersecting_mut<'a>(
        &'a mut self,
        pos: u64,
        len: u64,
    ) -> impl Iterator<Item = (&'a Key, &'a mut V)> + 'a
    where
        V: AsWrite,
    {
        let bounds = self.scan_bounds(pos, len);
        self.map
            .range_mut(bounds)
            .filter(move |(_, v)| v.write().intersects(pos, len))
    }
}

/// Index value that refers to a write
trait AsWrite {
    fn write(&self) -> &Arc<WriteIo>;
}

impl AsWrite for Arc<WriteIo> {
    fn write(&self) -> &Arc<WriteIo> {
        self
    }
}
