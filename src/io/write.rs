//! Write requests
//!
//! A [`WriteIo`] is one client write travelling through the pipeline. It is
//! shared as `Arc<WriteIo>` between the pack that logged it and the two
//! indexes; mutable bookkeeping sits behind a small mutex and moves through
//! [`WriteState`] only along legal transitions.

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Result, WalError};
use crate::SECTOR_SIZE;

use super::completion::{Completer, Latch};
use super::fragment::{FragmentList, IoFragment, Target};

/// Request flags carried into the logpack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteFlags {
    /// Everything logged before this write must be durable first
    pub flush: bool,
    /// This write must be durable when acknowledged
    pub fua: bool,
}

/// What a write carries
#[derive(Debug, Clone)]
pub enum WriteKind {
    /// Sector-aligned payload (empty for a zero-length flush)
    Data(Bytes),
    /// Range whose contents are dropped
    Discard { sectors: u32 },
}

/// Data-device progress of a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    /// Not yet handed to the data device
    Prepared,
    /// Logged, waiting for intersecting predecessors
    Delayed,
    /// Data-device I/O issued
    Submitted,
    /// Applied to the data device (or nothing to apply)
    Completed,
    /// Failed on the log or data device
    Failed,
}

impl WriteState {
    fn can_move_to(self, next: WriteState) -> bool {
        use WriteState::*;
        matches!(
            (self, next),
            (Prepared, Delayed | Submitted | Completed | Failed)
                | (Delayed, Submitted | Failed)
                | (Submitted, Completed | Failed)
        )
    }
}

#[derive(Debug)]
struct WriteMeta {
    lsid: Option<u64>,
    checksum: u32,
    state: WriteState,
    overwritten: bool,
}

/// One client write
#[derive(Debug)]
pub struct WriteIo {
    /// Admission order; breaks ties between equal start sectors
    id: u64,
    pos: u64,
    len: u32,
    kind: WriteKind,
    flags: WriteFlags,
    meta: Mutex<WriteMeta>,
    ack: Mutex<Option<Completer<()>>>,
    applied: Latch,
}

impl WriteIo {
    /// Build a write. Payload length must be sector aligned.
    pub fn new(
        id: u64,
        pos: u64,
        kind: WriteKind,
        flags: WriteFlags,
        ack: Option<Completer<()>>,
    ) -> Result<Self> {
        let len = match &kind {
            WriteKind::Data(data) => {
                if data.len() % SECTOR_SIZE != 0 {
                    return Err(WalError::Misaligned {
                        len: data.len(),
                        unit: SECTOR_SIZE,
                    });
                }
                u32::try_from(data.len() / SECTOR_SIZE).map_err(|_| WalError::TooLarge {
                    sectors: (data.len() / SECTOR_SIZE) as u64,
                    limit: u64::from(u32::MAX),
                })?
            }
            WriteKind::Discard { sectors } => *sectors,
        };
        Ok(Self {
            id,
            pos,
            len,
            kind,
            flags,
            meta: Mutex::new(WriteMeta {
                lsid: None,
                checksum: 0,
                state: WriteState::Prepared,
                overwritten: false,
            }),
            ack: Mutex::new(ack),
            applied: Latch::new(),
        })
    }

    // =========================================================================
    // Request Shape
    // =========================================================================

    pub fn id(&self) -> u64 {
        self.id
    }

    /// First sector
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Length in sectors
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last sector
    pub fn end(&self) -> u64 {
        self.pos + u64::from(self.len)
    }

    pub fn flags(&self) -> WriteFlags {
        self.flags
    }

    pub fn is_discard(&self) -> bool {
        matches!(self.kind, WriteKind::Discard { .. })
    }

    /// Zero-length flush: durability barrier with nothing to apply
    pub fn is_zero_flush(&self) -> bool {
        self.len == 0 && self.flags.flush
    }

    /// Payload bytes; `None` for discards
    pub fn payload(&self) -> Option<&Bytes> {
        match &self.kind {
            WriteKind::Data(data) => Some(data),
            WriteKind::Discard { .. } => None,
        }
    }

    /// Half-open range intersection with `[pos, pos + len)`
    pub fn intersects(&self, pos: u64, len: u64) -> bool {
        self.len > 0 && len > 0 && self.pos < pos + len && pos < self.end()
    }

    /// True if this write's range lies within `[pos, pos + len)`
    pub fn is_covered_by(&self, pos: u64, len: u64) -> bool {
        pos <= self.pos && self.end() <= pos + len
    }

    /// Data-device fragments, split by `chunk_sectors`
    pub fn data_fragments(&self, chunk_sectors: u32) -> Option<FragmentList<Bytes>> {
        let data = self.payload()?;
        if data.is_empty() {
            return None;
        }
        let frag = IoFragment::new(Target::Data, self.pos, data.clone());
        let mut list = FragmentList::new(frag);
        list.split_by_chunk(chunk_sectors);
        Some(list)
    }

    /// `(sector, sectors)` pieces of a discard, split like data fragments so
    /// none crosses a multiple of `chunk_sectors`. Empty for data writes.
    pub fn discard_spans(&self, chunk_sectors: u32) -> Vec<(u64, u32)> {
        if !self.is_discard() || self.is_empty() {
            return Vec::new();
        }
        if chunk_sectors == 0 {
            return vec![(self.pos, self.len)];
        }
        let chunk = u64::from(chunk_sectors);
        let mut spans = Vec::new();
        let mut sector = self.pos;
        while sector < self.end() {
            let next = (sector - sector % chunk + chunk).min(self.end());
            spans.push((sector, (next - sector) as u32));
            sector = next;
        }
        spans
    }

    // =========================================================================
    // Log Bookkeeping
    // =========================================================================

    pub fn lsid(&self) -> Option<u64> {
        self.meta.lock().lsid
    }

    pub fn set_lsid(&self, lsid: u64) {
        self.meta.lock().lsid = Some(lsid);
    }

    pub fn checksum(&self) -> u32 {
        self.meta.lock().checksum
    }

    pub fn set_checksum(&self, checksum: u32) {
        self.meta.lock().checksum = checksum;
    }

    // =========================================================================
    // State Machine
    // =========================================================================

    pub fn state(&self) -> WriteState {
        self.meta.lock().state
    }

    /// Move to `next`. Illegal transitions are invariant violations.
    pub fn transition(&self, next: WriteState) {
        let mut meta = self.meta.lock();
        assert!(
            meta.state.can_move_to(next),
            "write {} illegal state transition {:?} -> {:?}",
            self.id,
            meta.state,
            next
        );
        meta.state = next;
    }

    /// Caller must hold the pending index lock.
    pub(crate) fn mark_overwritten(&self) {
        self.meta.lock().overwritten = true;
    }

    /// Dropped from the pending index early by a covering later write
    pub fn is_overwritten(&self) -> bool {
        self.meta.lock().overwritten
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Deliver the client's outcome. Only the first call has an effect.
    pub fn acknowledge(&self, result: Result<()>) {
        if let Some(ack) = self.ack.lock().take() {
            ack.complete(result);
        }
    }

    /// Fail the write: acknowledge with `err` and release data waiters.
    pub fn fail(&self, err: WalError) {
        self.transition(WriteState::Failed);
        self.acknowledge(Err(err));
        self.applied.open();
    }

    /// Opened once the write has reached the data device (or failed)
    pub fn applied(&self) -> &Latch {
        &self.applied
    }
}
