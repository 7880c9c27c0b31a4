//! Wait stage
//!
//! Collects log completions in LSID order. A durable pack's writes are
//! indexed, acknowledged and handed to the data pool; a failed pack fails all
//! of its members.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam::channel::Receiver;

use crate::error::WalError;
use crate::io::WriteState;
use crate::logpack::Pack;

use super::submit::LoggedPack;
use super::{Counters, Shared};

/// Wait thread body. Exits once the submit thread is gone and every pack it
/// sent has been handled.
pub(crate) fn run_wait(shared: &Arc<Shared>, rx: Receiver<LoggedPack>) {
    for LoggedPack { pack, logged } in rx.iter() {
        match logged.wait() {
            Ok(()) => complete_logged(shared, pack),
            Err(e) => fail_pack(shared, pack, e),
        }
    }
    tracing::debug!("wait thread drained");
}

fn complete_logged(shared: &Arc<Shared>, pack: Pack) {
    let lsid = pack.lsid();
    let next_lsid = pack.next_lsid();
    let progress = Arc::clone(pack.progress());
    let members = pack.into_members();
    let data_members = members.iter().filter(|m| !m.io.is_zero_flush()).count();

    if progress.log_waited(data_members) {
        Counters::bump(&shared.counters.packs_freed);
        tracing::trace!(lsid, "logpack freed at log completion");
    }
    shared.counters.completed_lsid.store(next_lsid, Ordering::Relaxed);

    let prune = shared.prune_pending();
    for member in members {
        let io = member.io;
        if io.is_zero_flush() {
            // Durable through the flush issued with the pack.
            io.transition(WriteState::Completed);
            io.acknowledge(Ok(()));
            io.applied().open();
            Counters::bump(&shared.counters.writes_acked);
            shared.write_finished();
            continue;
        }

        if shared.pending.insert(&io, prune) {
            tracing::debug!(id = io.id(), "pending watermark reached");
        }
        let eligible = shared.insert_overlap(&io, &progress);
        io.acknowledge(Ok(()));
        Counters::bump(&shared.counters.writes_acked);
        tracing::trace!(id = io.id(), lsid = io.lsid(), eligible, "write acknowledged");

        if eligible {
            shared.submit_data(io, Arc::clone(&progress));
        }
    }
}

fn fail_pack(shared: &Shared, pack: Pack, err: WalError) {
    // Header allocation failures only cost this pack.
    if !pack.is_failed() && !matches!(err, WalError::ReadOnly) {
        shared.set_read_only(&err);
    }
    let lsid = pack.lsid();
    let progress = Arc::clone(pack.progress());
    let members = pack.into_members();
    tracing::warn!(lsid, members = members.len(), error = %err, "failing logpack members");
    for member in members {
        shared.fail_write(&member.io, err.duplicate());
    }
    if progress.log_waited(0) {
        Counters::bump(&shared.counters.packs_freed);
    }
}
