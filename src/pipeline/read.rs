//! Read strategies
//!
//! Chosen once when the device opens:
//! - [`FastReads`] copies bytes of overlapping pending writes and reads only
//!   the rest from the data device
//! - [`DeviceThroughReads`] waits for overlapping pending writes to reach the
//!   data device, then reads everything from it

use std::sync::Arc;

use crate::config::ReadStrategyKind;
use crate::error::Result;
use crate::io::ReadIo;

use super::Shared;

/// How a read is served against not yet applied writes
pub(crate) trait ReadStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fill `read`. Returns the sectors served without device I/O.
    fn read(&self, shared: &Shared, read: &mut ReadIo) -> Result<u64>;
}

/// Shadow-copy from the pending index
#[derive(Debug, Default)]
pub(crate) struct FastReads;

impl ReadStrategy for FastReads {
    fn name(&self) -> &'static str {
        "fast"
    }

    fn read(&self, shared: &Shared, read: &mut ReadIo) -> Result<u64> {
        let copied = shared.pending.check_and_copy(read);
        read.read_remaining(shared.data.as_ref(), shared.config.data_chunk_sectors)?;
        Ok(copied)
    }
}

/// Read through to the data device once overlapping writes landed
#[derive(Debug, Default)]
pub(crate) struct DeviceThroughReads;

impl ReadStrategy for DeviceThroughReads {
    fn name(&self) -> &'static str {
        "device-through"
    }

    fn read(&self, shared: &Shared, read: &mut ReadIo) -> Result<u64> {
        let timeout = shared.io_timeout();
        for io in shared.pending.overlapping(read.pos(), u64::from(read.len())) {
            io.applied().wait("pending write before device-through read", timeout);
        }
        read.read_remaining(shared.data.as_ref(), shared.config.data_chunk_sectors)?;
        Ok(0)
    }
}

pub(crate) fn read_strategy(kind: ReadStrategyKind) -> Arc<dyn ReadStrategy> {
    match kind {
        ReadStrategyKind::Fast => Arc::new(FastReads),
        ReadStrategyKind::DeviceThrough => Arc::new(DeviceThroughReads),
    }
}
