//! Data-device write and garbage collection
//!
//! Runs on the data pool. Applies one acknowledged write to the data device,
//! then unhooks it from both indexes, releases any writes it was holding
//! back, and counts it off its pack.

use std::sync::Arc;

use crate::error::Result;
use crate::io::{WriteIo, WriteState};
use crate::logpack::PackProgress;

use super::{Counters, Shared};

pub(crate) fn apply_write(shared: &Arc<Shared>, io: Arc<WriteIo>, progress: Arc<PackProgress>) {
    io.transition(WriteState::Submitted);
    let result = write_data(shared, &io);

    // GC
    if shared.config.overlap_serialization {
        for next in shared.overlap.remove(&io) {
            let next_progress = shared.unpark(&next);
            tracing::trace!(id = next.id(), after = io.id(), "overlapped write released");
            shared.submit_data(next, next_progress);
        }
    }
    shared.pending.remove(&io);

    match result {
        Ok(()) => {
            io.transition(WriteState::Completed);
            io.applied().open();
            Counters::bump(&shared.counters.writes_applied);
        }
        Err(e) => {
            // Already acknowledged: surfaced only through the read-only flag.
            tracing::error!(id = io.id(), pos = io.pos(), len = io.len(), error = %e, "data write failed");
            shared.set_read_only(&e);
            io.fail(e);
        }
    }

    if progress.member_done() {
        Counters::bump(&shared.counters.packs_freed);
        tracing::trace!(lsid = progress.lsid(), "logpack freed");
    }
    shared.write_finished();
}

fn write_data(shared: &Shared, io: &WriteIo) -> Result<()> {
    let data = shared.data.as_ref();
    if io.is_discard() {
        for (sector, sectors) in io.discard_spans(shared.config.data_chunk_sectors) {
            data.discard(sector, sectors)?;
        }
        return Ok(());
    }
    let Some(mut fragments) = io.data_fragments(shared.config.data_chunk_sectors) else {
        return Ok(());
    };
    for frag in fragments.iter_mut() {
        frag.write_to(data);
        if !frag.is_done() {
            break;
        }
    }
    fragments.join()
}
