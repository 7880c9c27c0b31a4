//! Submit and log-I/O stages
//!
//! The submit thread drains the queue in batches, packs writes into
//! logpacks and hands each pack to the log-I/O thread, which writes packs to
//! the ring strictly in LSID order. The pack itself travels on to the wait
//! thread together with the completion of its log write.

use std::sync::Arc;

use bytes::Bytes;
use crossbeam::channel::{Receiver, Sender};

use crate::error::{Result, WalError};
use crate::io::{completion, Completer, Completion, IoFragment, WriteIo};
use crate::logpack::{LogpackBuilder, Pack, PackState};

use super::{Counters, Shared};

/// Log-device work for one pack
pub(crate) struct LogJob {
    lsid: u64,
    fragments: Vec<IoFragment<Bytes>>,
    /// Flush before writing (pack carries a flush request)
    preflush: bool,
    /// Flush after writing (FUA member, or a lone zero-length flush)
    postflush: bool,
    done: Completer<()>,
}

/// Pack on its way to the wait thread
pub(crate) struct LoggedPack {
    pub(crate) pack: Pack,
    pub(crate) logged: Completion<()>,
}

/// Submit thread body. Exits once the queue is closed and drained.
pub(crate) fn run_submit(
    shared: &Arc<Shared>,
    mut builder: LogpackBuilder,
    rx: Receiver<Arc<WriteIo>>,
    log_tx: Sender<LogJob>,
    wait_tx: Sender<LoggedPack>,
) {
    let batch_max = shared.config.submit_batch.max(1);
    let mut batch = Vec::with_capacity(batch_max);
    while let Ok(first) = rx.recv() {
        batch.push(first);
        while batch.len() < batch_max {
            match rx.try_recv() {
                Ok(io) => batch.push(io),
                Err(_) => break,
            }
        }

        for io in batch.drain(..) {
            if shared.is_read_only() {
                shared.fail_write(&io, WalError::ReadOnly);
                continue;
            }
            builder.add(io);
        }
        builder.freeze();

        for pack in builder.take_ready() {
            submit_pack(shared, pack, &log_tx, &wait_tx);
        }
        shared
            .counters
            .latest_lsid
            .store(builder.latest_lsid(), std::sync::atomic::Ordering::Relaxed);
    }
    tracing::debug!(latest_lsid = builder.latest_lsid(), "submit thread drained");
}

fn submit_pack(shared: &Shared, pack: Pack, log_tx: &Sender<LogJob>, wait_tx: &Sender<LoggedPack>) {
    pack.progress().advance(PackState::Submitted);
    Counters::bump(&shared.counters.packs_created);

    let (done, logged) = completion("logpack write", shared.io_timeout());
    if pack.is_failed() {
        done.complete(Err(WalError::LogIo {
            lsid: pack.lsid(),
            reason: "logpack header allocation failed".to_string(),
        }));
    } else {
        let job = LogJob {
            lsid: pack.lsid(),
            fragments: pack.log_fragments(&shared.geometry, shared.config.log_chunk_sectors),
            preflush: pack.has_flush() && !pack.is_zero_flush_only(),
            postflush: pack.is_fua() || pack.is_zero_flush_only(),
            done,
        };
        tracing::debug!(
            lsid = job.lsid,
            members = pack.members().len(),
            records = pack.header().n_records(),
            total_io_size = pack.header().total_io_size(),
            fragments = job.fragments.len(),
            preflush = job.preflush,
            postflush = job.postflush,
            "logpack submitted"
        );
        if let Err(e) = log_tx.send(job) {
            e.into_inner().done.complete(Err(WalError::Closed));
        }
    }

    if let Err(e) = wait_tx.send(LoggedPack { pack, logged }) {
        // The wait thread only exits after this sender is dropped.
        let LoggedPack { pack, .. } = e.into_inner();
        tracing::error!(lsid = pack.lsid(), "wait thread gone, failing logpack");
        for member in pack.into_members() {
            shared.fail_write(&member.io, WalError::Closed);
        }
    }
}

/// Log-I/O thread body. Packs arrive and are written in LSID order. The
/// first failure switches the device to read-only before any later pack is
/// taken off the queue.
pub(crate) fn run_log_io(shared: &Arc<Shared>, rx: Receiver<LogJob>) {
    for job in rx.iter() {
        let lsid = job.lsid;
        let result = if shared.is_read_only() {
            Err(WalError::ReadOnly)
        } else {
            write_pack(shared, job.fragments, job.preflush, job.postflush).map_err(|e| match e {
                WalError::ReadOnly => e,
                other => WalError::LogIo {
                    lsid,
                    reason: other.to_string(),
                },
            })
        };
        if let Err(e) = &result {
            tracing::warn!(lsid, error = %e, "logpack write failed");
            // Packs queued behind this one must not reach the ring past the hole.
            shared.set_read_only(e);
        }
        job.done.complete(result);
    }
    tracing::debug!("log thread drained");
}

fn write_pack(
    shared: &Shared,
    fragments: Vec<IoFragment<Bytes>>,
    preflush: bool,
    postflush: bool,
) -> Result<()> {
    let log = shared.log.as_ref();
    if preflush {
        log.flush()?;
    }
    for mut frag in fragments {
        frag.write_to(log);
        if let Some(e) = frag.take_error() {
            return Err(e);
        }
    }
    if postflush {
        log.flush()?;
    }
    Ok(())
}
