//! Read requests

use bytes::{Bytes, BytesMut};

use crate::device::BlockDevice;
use crate::error::Result;
use crate::SECTOR_SIZE;

use super::fragment::{FragmentList, IoFragment, Target};

/// One client read.
///
/// Starts as a single fragment covering the whole range; the pending index
/// splits off and fills the sub-ranges it can serve, the rest is read from the
/// data device.
#[derive(Debug)]
pub struct ReadIo {
    pos: u64,
    len: u32,
    fragments: FragmentList<BytesMut>,
    copied_sectors: u64,
}

impl ReadIo {
    pub fn new(pos: u64, len: u32) -> Self {
        let buf = BytesMut::zeroed(len as usize * SECTOR_SIZE);
        Self {
            pos,
            len,
            fragments: FragmentList::new(IoFragment::new(Target::Data, pos, buf)),
            copied_sectors: 0,
        }
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn fragments_mut(&mut self) -> &mut FragmentList<BytesMut> {
        &mut self.fragments
    }

    /// Sectors served from pending writes instead of the device
    pub fn copied_sectors(&self) -> u64 {
        self.copied_sectors
    }

    pub(crate) fn add_copied(&mut self, sectors: u64) {
        self.copied_sectors += sectors;
    }

    /// Sectors still to be read from the device
    pub fn uncovered_sectors(&self) -> u64 {
        self.fragments
            .iter()
            .filter(|f| !f.is_done())
            .map(|f| f.sectors())
            .sum()
    }

    /// Read every unsatisfied fragment from `dev`, then join.
    pub fn read_remaining(&mut self, dev: &dyn BlockDevice, chunk_sectors: u32) -> Result<()> {
        self.fragments.split_by_chunk(chunk_sectors);
        for frag in self.fragments.iter_mut().filter(|f| !f.is_done()) {
            frag.read_from(dev);
        }
        self.fragments.join()
    }

    /// Assemble the result buffer.
    pub fn into_bytes(self) -> Bytes {
        if self.len == 0 {
            return Bytes::new();
        }
        self.fragments.into_bytes()
    }
}
