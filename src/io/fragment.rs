//! I/O fragments
//!
//! An [`IoFragment`] is a contiguous, sector-aligned byte range bound for one
//! device at one sector offset. Fragments split at any sector boundary without
//! copying (`Bytes`/`BytesMut` share the allocation), and a
//! [`FragmentList`] keeps an ordered, gap-free run of them so sub-ranges can be
//! isolated by absolute sector.

use std::ops::Range;

use bytes::{Bytes, BytesMut};

use crate::device::BlockDevice;
use crate::error::{Result, WalError};
use crate::SECTOR_SIZE;

/// Buffer types a fragment can own
pub trait FragmentBuf: AsRef<[u8]> + Sized {
    /// Split off and return the first `at` bytes; `self` keeps the rest.
    fn split_front(&mut self, at: usize) -> Self;
}

impl FragmentBuf for Bytes {
    fn split_front(&mut self, at: usize) -> Self {
        self.split_to(at)
    }
}

impl FragmentBuf for BytesMut {
    fn split_front(&mut self, at: usize) -> Self {
        self.split_to(at)
    }
}

/// Which underlying device a fragment goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Log,
    Data,
}

/// Completion state of a fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentState {
    Pending,
    Done,
    Failed,
}

/// Owned byte range destined for `target` at `sector`
#[derive(Debug)]
pub struct IoFragment<B> {
    target: Target,
    sector: u64,
    buf: B,
    state: FragmentState,
    error: Option<WalError>,
}

impl<B: FragmentBuf> IoFragment<B> {
    /// Create a fragment; `buf` must be a whole number of sectors.
    pub fn new(target: Target, sector: u64, buf: B) -> Self {
        assert_eq!(
            buf.as_ref().len() % SECTOR_SIZE,
            0,
            "fragment length must be sector aligned"
        );
        Self {
            target,
            sector,
            buf,
            state: FragmentState::Pending,
            error: None,
        }
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn sector(&self) -> u64 {
        self.sector
    }

    pub fn sectors(&self) -> u64 {
        (self.buf.as_ref().len() / SECTOR_SIZE) as u64
    }

    /// One past the last sector
    pub fn end_sector(&self) -> u64 {
        self.sector + self.sectors()
    }

    pub fn bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }

    pub fn state(&self) -> FragmentState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == FragmentState::Done
    }

    pub fn into_buf(self) -> B {
        self.buf
    }

    /// Record the outcome of this fragment's I/O.
    pub fn complete(&mut self, result: Result<()>) {
        match result {
            Ok(()) => self.state = FragmentState::Done,
            Err(e) => {
                self.state = FragmentState::Failed;
                self.error = Some(e);
            }
        }
    }

    pub fn take_error(&mut self) -> Option<WalError> {
        self.error.take()
    }

    /// Split off the first `sectors` sectors. `self` keeps the tail and both
    /// halves keep the current state.
    pub fn split_front(&mut self, sectors: u64) -> IoFragment<B> {
        assert!(
            sectors > 0 && sectors < self.sectors(),
            "split point {sectors} outside fragment of {} sectors",
            self.sectors()
        );
        let front = self.buf.split_front(sectors as usize * SECTOR_SIZE);
        let head = IoFragment {
            target: self.target,
            sector: self.sector,
            buf: front,
            state: self.state,
            error: None,
        };
        self.sector += sectors;
        head
    }

    /// Split so that no piece crosses a multiple of `chunk_sectors` in
    /// absolute sector space. A chunk of 0 means no limit.
    pub fn split_by_chunk(mut self, chunk_sectors: u32) -> Vec<IoFragment<B>> {
        if chunk_sectors == 0 {
            return vec![self];
        }
        let chunk = u64::from(chunk_sectors);
        let mut out = Vec::new();
        loop {
            let to_boundary = chunk - self.sector % chunk;
            if to_boundary >= self.sectors() {
                out.push(self);
                return out;
            }
            out.push(self.split_front(to_boundary));
        }
    }
}

impl IoFragment<Bytes> {
    /// Write this fragment to `dev` and record the outcome.
    pub fn write_to(&mut self, dev: &dyn BlockDevice) {
        let result = dev.write_at(self.sector, &self.buf);
        self.complete(result);
    }
}

impl IoFragment<BytesMut> {
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Fill this fragment from `dev` and record the outcome.
    pub fn read_from(&mut self, dev: &dyn BlockDevice) {
        let result = dev.read_at(self.sector, &mut self.buf);
        self.complete(result);
    }

    /// Copy the covering part of `src` (which starts at `src_sector`) into
    /// this fragment. The fragment must lie inside the source range.
    pub fn copy_from(&mut self, src_sector: u64, src: &[u8]) {
        assert!(self.sector >= src_sector, "fragment starts before source");
        let offset = (self.sector - src_sector) as usize * SECTOR_SIZE;
        let len = self.buf.len();
        self.buf.copy_from_slice(&src[offset..offset + len]);
    }
}

/// Ordered, contiguous run of fragments
#[derive(Debug)]
pub struct FragmentList<B> {
    frags: Vec<IoFragment<B>>,
}

impl<B: FragmentBuf> FragmentList<B> {
    pub fn new(first: IoFragment<B>) -> Self {
        Self { frags: vec![first] }
    }

    pub fn len(&self) -> usize {
        self.frags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frags.is_empty()
    }

    pub fn start_sector(&self) -> u64 {
        self.frags.first().map(|f| f.sector()).unwrap_or(0)
    }

    pub fn end_sector(&self) -> u64 {
        self.frags.last().map(|f| f.end_sector()).unwrap_or(0)
    }

    pub fn total_sectors(&self) -> u64 {
        self.frags.iter().map(|f| f.sectors()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IoFragment<B>> {
        self.frags.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut IoFragment<B>> {
        self.frags.iter_mut()
    }

    pub fn fragments_mut(&mut self, range: Range<usize>) -> &mut [IoFragment<B>] {
        &mut self.frags[range]
    }

    pub fn into_vec(self) -> Vec<IoFragment<B>> {
        self.frags
    }

    /// Make sure a fragment boundary exists at absolute `sector`.
    pub fn split_at_sector(&mut self, sector: u64) {
        // First fragment whose end lies beyond `sector`.
        let idx = self.frags.partition_point(|f| f.end_sector() <= sector);
        let Some(frag) = self.frags.get_mut(idx) else {
            return;
        };
        if frag.sector() >= sector {
            return;
        }
        let head = frag.split_front(sector - frag.sector());
        self.frags.insert(idx, head);
    }

    /// Split at the clamped edges of `[start, end)` and return the index range
    /// of the fragments lying inside it.
    pub fn isolate(&mut self, start: u64, end: u64) -> Range<usize> {
        let start = start.max(self.start_sector());
        let end = end.min(self.end_sector());
        if start >= end {
            return 0..0;
        }
        self.split_at_sector(start);
        self.split_at_sector(end);
        let first = self.frags.partition_point(|f| f.sector() < start);
        let last = self.frags.partition_point(|f| f.end_sector() <= end);
        first..last
    }

    /// Re-split every fragment so none crosses a chunk boundary.
    pub fn split_by_chunk(&mut self, chunk_sectors: u32) {
        let frags = std::mem::take(&mut self.frags);
        self.frags = frags
            .into_iter()
            .flat_map(|f| f.split_by_chunk(chunk_sectors))
            .collect();
    }

    /// Join of every fragment outcome: the first error, if any.
    pub fn join(&mut self) -> Result<()> {
        for frag in &mut self.frags {
            match frag.state() {
                FragmentState::Done => {}
                FragmentState::Failed => {
                    return Err(frag.take_error().unwrap_or_else(|| WalError::DataIo {
                        sector: frag.sector(),
                        reason: "fragment failed".to_string(),
                    }))
                }
                FragmentState::Pending => {
                    return Err(WalError::Disconnected(format!(
                        "fragment at sector {} never completed",
                        frag.sector()
                    )))
                }
            }
        }
        Ok(())
    }
}

impl FragmentList<BytesMut> {
    /// Reassemble the fragments into one buffer.
    ///
    /// Fragments split from one allocation are rejoined without copying.
    pub fn into_bytes(self) -> Bytes {
        let mut iter = self.frags.into_iter().map(IoFragment::into_buf);
        let Some(mut out) = iter.next() else {
            return Bytes::new();
        };
        for buf in iter {
            out.unsplit(buf);
        }
        out.freeze()
    }
}
