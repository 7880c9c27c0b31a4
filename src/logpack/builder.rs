//! Logpack builder
//!
//! Batches writes into packs in arrival order. A pack is closed ("frozen")
//! when the next write would overflow the header's record array or the
//! configured block budget, or when a flush request arrives behind other
//! members. LSIDs advance as packs are frozen.

use std::sync::Arc;

use crate::io::{BlockAllocator, WriteIo};

use super::header::{capacity_pb, LogRecord};
use super::pack::Pack;
use super::RingGeometry;

/// Packs writes into logpacks and hands out frozen packs in LSID order
pub struct LogpackBuilder {
    geometry: RingGeometry,
    /// Per-pack budget in physical blocks (0 = header capacity only)
    max_logpack_pb: u32,
    allocator: Arc<dyn BlockAllocator>,
    /// LSID the next pack opens at
    latest_lsid: u64,
    current: Option<Pack>,
    ready: Vec<Pack>,
}

impl LogpackBuilder {
    pub fn new(
        geometry: RingGeometry,
        max_logpack_pb: u32,
        latest_lsid: u64,
        allocator: Arc<dyn BlockAllocator>,
    ) -> Self {
        Self {
            geometry,
            max_logpack_pb,
            allocator,
            latest_lsid,
            current: None,
            ready: Vec::new(),
        }
    }

    /// LSID the next pack will open at
    pub fn latest_lsid(&self) -> u64 {
        self.latest_lsid
    }

    /// Add a write to the open pack, opening or rolling packs as needed.
    pub fn add(&mut self, io: Arc<WriteIo>) {
        if io.flags().flush && self.current.as_ref().is_some_and(|p| !p.is_empty()) {
            self.freeze();
        }
        if self.try_add(&io) {
            return;
        }
        self.freeze();
        let added = self.try_add(&io);
        assert!(added, "write {} does not fit in an empty logpack", io.id());
    }

    /// Freeze the open pack, if any, and queue it.
    pub fn freeze(&mut self) {
        let Some(mut pack) = self.current.take() else {
            return;
        };
        if pack.is_empty() {
            return;
        }
        pack.freeze(self.geometry.salt());
        self.latest_lsid = pack.next_lsid();
        tracing::trace!(
            lsid = pack.lsid(),
            next_lsid = self.latest_lsid,
            members = pack.members().len(),
            records = pack.header().n_records(),
            total_io_size = pack.header().total_io_size(),
            "logpack frozen"
        );
        self.ready.push(pack);
    }

    /// Take every frozen pack, oldest first.
    pub fn take_ready(&mut self) -> Vec<Pack> {
        std::mem::take(&mut self.ready)
    }

    fn open(&mut self) -> &mut Pack {
        let allocator = &self.allocator;
        let lsid = self.latest_lsid;
        let block_size = self.geometry.block_size() as usize;
        self.current.get_or_insert_with(|| {
            let block = match allocator.allocate(block_size) {
                Ok(block) => Some(block),
                Err(e) => {
                    tracing::warn!(lsid, error = %e, "logpack header allocation failed");
                    None
                }
            };
            Pack::new(lsid, block)
        })
    }

    fn try_add(&mut self, io: &Arc<WriteIo>) -> bool {
        let geometry = self.geometry;
        let max_logpack_pb = u64::from(self.max_logpack_pb);
        let pack = self.open();

        // Members of a failed pack only need to be failed together.
        if pack.is_failed() {
            pack.push_member(Arc::clone(io), None);
            return true;
        }

        if io.is_zero_flush() {
            pack.push_member(Arc::clone(io), None);
            return true;
        }

        let logpack_lsid = pack.lsid();
        let n_records = pack.header().n_records();
        let total = u64::from(pack.header().total_io_size());
        let has_records = n_records > 0;
        let max_records = geometry.max_records();

        if io.is_discard() {
            if n_records + 1 > max_records {
                return false;
            }
            let lsid_local = 1 + total;
            pack.header_mut().push(
                LogRecord {
                    offset: io.pos(),
                    io_size: io.len(),
                    lsid_local,
                    is_exist: true,
                    is_discard: true,
                    ..Default::default()
                },
                0,
            );
            io.set_lsid(logpack_lsid + lsid_local);
            pack.push_member(Arc::clone(io), Some(n_records));
            return true;
        }

        let spb = geometry.sectors_per_block();
        let req_pb = capacity_pb(io.len(), spb);
        let ring = geometry.ring_buffer_size();
        let mut req_lsid = logpack_lsid + 1 + total;

        // Keep the record's blocks contiguous: skip to the wrap point first.
        let ring_pos = req_lsid % ring;
        let padding_pb = if ring_pos + req_pb > ring { ring - ring_pos } else { 0 };
        let slots = if padding_pb > 0 { 2 } else { 1 };

        if n_records + slots > max_records {
            return false;
        }
        let grown = total + padding_pb + req_pb;
        if has_records && max_logpack_pb > 0 && grown > max_logpack_pb {
            return false;
        }
        if 1 + grown > ring {
            if has_records {
                return false;
            }
            panic!(
                "write of {req_pb} blocks cannot fit in a {ring}-block ring at lsid {logpack_lsid}"
            );
        }

        if padding_pb > 0 {
            pack.header_mut().push(
                LogRecord {
                    offset: 0,
                    io_size: (padding_pb * u64::from(spb)) as u32,
                    lsid_local: req_lsid - logpack_lsid,
                    is_exist: true,
                    is_padding: true,
                    ..Default::default()
                },
                padding_pb,
            );
            req_lsid += padding_pb;
        }

        let record_idx = pack.header().n_records();
        pack.header_mut().push(
            LogRecord {
                offset: io.pos(),
                io_size: io.len(),
                lsid_local: req_lsid - logpack_lsid,
                is_exist: true,
                ..Default::default()
            },
            req_pb,
        );
        io.set_lsid(req_lsid);
        pack.push_member(Arc::clone(io), Some(record_idx));
        true
    }
}
