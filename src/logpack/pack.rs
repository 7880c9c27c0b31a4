//! Runtime logpack
//!
//! A [`Pack`] groups the writes sharing one header. Its lifecycle
//! (`Building → Submitted → LogWaited → Done`) is tracked by a shared
//! [`PackProgress`] so data-I/O jobs can count members off after the pack
//! itself has been consumed by the wait stage.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::io::{checksum, IoFragment, Target, WriteIo};
use crate::SECTOR_SIZE;

use super::header::LogpackHeader;
use super::RingGeometry;

/// Lifecycle of a pack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackState {
    Building,
    Submitted,
    LogWaited,
    Done,
}

impl PackState {
    fn successor(self) -> Option<PackState> {
        match self {
            PackState::Building => Some(PackState::Submitted),
            PackState::Submitted => Some(PackState::LogWaited),
            PackState::LogWaited => Some(PackState::Done),
            PackState::Done => None,
        }
    }
}

#[derive(Debug)]
struct ProgressInner {
    state: PackState,
    /// Members whose data-device write has not yet been collected
    remaining: usize,
}

/// Shared lifecycle tracker of one pack
#[derive(Debug)]
pub struct PackProgress {
    lsid: u64,
    inner: Mutex<ProgressInner>,
}

impl PackProgress {
    fn new(lsid: u64) -> Self {
        Self {
            lsid,
            inner: Mutex::new(ProgressInner {
                state: PackState::Building,
                remaining: 0,
            }),
        }
    }

    pub fn lsid(&self) -> u64 {
        self.lsid
    }

    pub fn state(&self) -> PackState {
        self.inner.lock().state
    }

    /// Step to `next`, which must be the immediate successor.
    pub fn advance(&self, next: PackState) {
        let mut inner = self.inner.lock();
        assert_eq!(
            inner.state.successor(),
            Some(next),
            "pack lsid={} illegal transition {:?} -> {:?}",
            self.lsid,
            inner.state,
            next
        );
        inner.state = next;
    }

    /// Enter `LogWaited` expecting `members` data completions. Returns true
    /// when there is nothing to wait for and the pack went straight to `Done`.
    pub fn log_waited(&self, members: usize) -> bool {
        self.advance(PackState::LogWaited);
        let mut inner = self.inner.lock();
        inner.remaining = members;
        if members == 0 {
            inner.state = PackState::Done;
            return true;
        }
        false
    }

    /// Count one member off. Returns true for the last one, which moves the
    /// pack to `Done`.
    pub fn member_done(&self) -> bool {
        let mut inner = self.inner.lock();
        assert_eq!(inner.state, PackState::LogWaited, "pack lsid={} not waiting", self.lsid);
        assert!(inner.remaining > 0, "pack lsid={} member underflow", self.lsid);
        inner.remaining -= 1;
        if inner.remaining == 0 {
            inner.state = PackState::Done;
            return true;
        }
        false
    }
}

/// Member of a pack and the index of its record, if it has one
#[derive(Debug)]
pub struct PackMember {
    pub io: Arc<WriteIo>,
    pub record: Option<usize>,
}

/// Writes sharing one logpack header
#[derive(Debug)]
pub struct Pack {
    header: LogpackHeader,
    members: Vec<PackMember>,
    /// Encoded header block; `None` if it could not be allocated
    header_block: Option<Vec<u8>>,
    fua: bool,
    flush: bool,
    zero_flush_only: bool,
    failed: bool,
    progress: Arc<PackProgress>,
}

impl Pack {
    pub(crate) fn new(lsid: u64, header_block: Option<Vec<u8>>) -> Self {
        let failed = header_block.is_none();
        Self {
            header: LogpackHeader::new(lsid),
            members: Vec::new(),
            header_block,
            fua: false,
            flush: false,
            zero_flush_only: false,
            failed,
            progress: Arc::new(PackProgress::new(lsid)),
        }
    }

    pub fn lsid(&self) -> u64 {
        self.header.logpack_lsid()
    }

    pub fn header(&self) -> &LogpackHeader {
        &self.header
    }

    pub(crate) fn header_mut(&mut self) -> &mut LogpackHeader {
        &mut self.header
    }

    pub fn members(&self) -> &[PackMember] {
        &self.members
    }

    pub fn into_members(self) -> Vec<PackMember> {
        self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub(crate) fn push_member(&mut self, io: Arc<WriteIo>, record: Option<usize>) {
        self.fua |= io.flags().fua;
        self.flush |= io.flags().flush;
        self.members.push(PackMember { io, record });
    }

    pub fn is_fua(&self) -> bool {
        self.fua
    }

    pub fn has_flush(&self) -> bool {
        self.flush
    }

    pub fn is_zero_flush_only(&self) -> bool {
        self.zero_flush_only
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn progress(&self) -> &Arc<PackProgress> {
        &self.progress
    }

    /// LSID of the following pack.
    ///
    /// A failed pack writes nothing, so the LSID does not move.
    pub fn next_lsid(&self) -> u64 {
        if self.failed {
            self.lsid()
        } else {
            self.header.next_lsid()
        }
    }

    /// Finalize the pack: stamp member checksums into their records, encode
    /// and checksum the header block, and detect a lone zero-length flush.
    pub(crate) fn freeze(&mut self, salt: u32) {
        self.zero_flush_only = self.members.len() == 1 && self.members[0].io.is_zero_flush();
        for member in &self.members {
            let Some(idx) = member.record else { continue };
            let csum = match member.io.payload() {
                Some(data) => checksum(data, salt),
                None => 0,
            };
            member.io.set_checksum(csum);
            self.header.record_mut(idx).checksum = csum;
        }
        if let Some(block) = self.header_block.as_mut() {
            self.header.encode(block, salt);
        }
    }

    /// Log-device fragments: the header block, then each record's payload at
    /// its ring position, zero padded to whole physical blocks and split by
    /// `chunk_sectors`. Empty for a zero-flush-only or failed pack.
    pub fn log_fragments(&self, geometry: &RingGeometry, chunk_sectors: u32) -> Vec<IoFragment<Bytes>> {
        if self.zero_flush_only || self.failed || self.header.n_records() == 0 {
            return Vec::new();
        }
        let Some(block) = self.header_block.as_ref() else {
            return Vec::new();
        };
        let mut out = IoFragment::new(
            Target::Log,
            geometry.lsid_to_sector(self.lsid()),
            Bytes::copy_from_slice(block),
        )
        .split_by_chunk(chunk_sectors);

        let block_bytes = geometry.block_size() as usize;
        for member in &self.members {
            let Some(idx) = member.record else { continue };
            let Some(data) = member.io.payload() else { continue };
            if data.is_empty() {
                continue;
            }
            let record = &self.header.records()[idx];
            let padded = if data.len() % block_bytes == 0 {
                data.clone()
            } else {
                let mut buf = vec![0u8; data.len().div_ceil(block_bytes) * block_bytes];
                buf[..data.len()].copy_from_slice(data);
                Bytes::from(buf)
            };
            debug_assert_eq!(padded.len() % SECTOR_SIZE, 0);
            let sector = geometry.lsid_to_sector(record.lsid(self.lsid()));
            out.extend(IoFragment::new(Target::Log, sector, padded).split_by_chunk(chunk_sectors));
        }
        out
    }
}
