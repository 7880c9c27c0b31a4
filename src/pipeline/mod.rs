//! Pipeline Module
//!
//! Moves writes from admission to the data device and serves reads.
//!
//! ## Stages
//! ```text
//!  client ──► submit queue ──► [submit] ──► [log io] ──► log device
//!                                 │  builder     │ LSID order
//!                                 │              ▼ completion
//!                                 └─────────► [wait] ──► ack client
//!                                                │  pending + overlap insert
//!                                                ▼
//!                                           [data pool] ──► data device
//!                                                │  gc: drop from indexes,
//!                                                │  release successors,
//!                                                ▼  free pack
//!  client ──► [read pool] ── pending copy / device read
//! ```
//!
//! One thread each for submit, log I/O and wait keeps LSID order and index
//! mutation serialized. Data writes and reads run on separate pools.

mod gc;
mod pool;
mod read;
mod stats;
mod submit;
mod wait;

pub use pool::WorkerPool;
pub(crate) use read::{read_strategy, ReadStrategy};
pub use stats::{Counters, PipelineStats};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use parking_lot::{Condvar, Mutex};

use crate::config::{Config, ReadStrategyKind};
use crate::device::BlockDevice;
use crate::error::{Result, WalError};
use crate::index::{OverlapIndex, PendingIndex};
use crate::io::WriteIo;
use crate::logpack::{LogpackBuilder, PackProgress, RingGeometry};

// =============================================================================
// Shared Context
// =============================================================================

/// Per-instance state every stage works against
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) geometry: RingGeometry,
    pub(crate) log: Arc<dyn BlockDevice>,
    pub(crate) data: Arc<dyn BlockDevice>,
    pub(crate) overlap: OverlapIndex,
    pub(crate) pending: PendingIndex,
    pub(crate) data_pool: WorkerPool,
    pub(crate) counters: Counters,
    /// Writes held back by the overlap index, with their pack
    delayed: Mutex<HashMap<u64, Arc<PackProgress>>>,
    read_only: AtomicBool,
    in_flight: InFlight,
}

impl Shared {
    pub(crate) fn new(
        config: Config,
        geometry: RingGeometry,
        log: Arc<dyn BlockDevice>,
        data: Arc<dyn BlockDevice>,
        pending: PendingIndex,
    ) -> Result<Self> {
        let data_pool = WorkerPool::new("walblock-data", config.data_io_threads)?;
        let counters = Counters::new(config.initial_lsid);
        Ok(Self {
            config,
            geometry,
            log,
            data,
            overlap: OverlapIndex::new(),
            pending,
            data_pool,
            counters,
            delayed: Mutex::new(HashMap::new()),
            read_only: AtomicBool::new(false),
            in_flight: InFlight::default(),
        })
    }

    pub(crate) fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.config.io_wait_timeout_ms)
    }

    /// Fully overwritten pending entries are only pruned when reads copy
    /// from the pending index; device-through reads must see every write.
    pub(crate) fn prune_pending(&self) -> bool {
        self.config.read_strategy == ReadStrategyKind::Fast
    }

    pub(crate) fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    pub(crate) fn set_read_only(&self, err: &WalError) {
        if !self.read_only.swap(true, Ordering::AcqRel) {
            tracing::error!(error = %err, "device switched to read-only");
        }
    }

    // -------------------------------------------------------------------------
    // Write accounting
    // -------------------------------------------------------------------------

    pub(crate) fn write_admitted(&self) {
        self.in_flight.add();
    }

    pub(crate) fn write_finished(&self) {
        self.in_flight.done();
    }

    pub(crate) fn wait_idle(&self) {
        self.in_flight.wait_idle(self.io_timeout());
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.count()
    }

    /// Fail a write that will never reach the log.
    pub(crate) fn fail_write(&self, io: &WriteIo, err: WalError) {
        io.fail(err);
        Counters::bump(&self.counters.writes_failed);
        self.write_finished();
    }

    // -------------------------------------------------------------------------
    // Data submission
    // -------------------------------------------------------------------------

    /// Index `io` in the overlap index. A write that has to wait is parked
    /// with its pack before any removal can release it.
    pub(crate) fn insert_overlap(&self, io: &Arc<WriteIo>, progress: &Arc<PackProgress>) -> bool {
        if !self.config.overlap_serialization {
            return true;
        }
        let mut delayed = self.delayed.lock();
        let eligible = self.overlap.insert(io);
        if !eligible {
            io.transition(crate::io::WriteState::Delayed);
            delayed.insert(io.id(), Arc::clone(progress));
            Counters::bump(&self.counters.writes_delayed);
        }
        eligible
    }

    /// Take the pack of a parked write that the overlap index released.
    pub(crate) fn unpark(&self, io: &WriteIo) -> Arc<PackProgress> {
        match self.delayed.lock().remove(&io.id()) {
            Some(progress) => progress,
            None => panic!("released write {} was never parked", io.id()),
        }
    }

    /// Hand `io` to the data pool.
    pub(crate) fn submit_data(self: &Arc<Self>, io: Arc<WriteIo>, progress: Arc<PackProgress>) {
        let shared = Arc::clone(self);
        self.data_pool
            .execute(move || gc::apply_write(&shared, io, progress));
    }
}

// =============================================================================
// In-flight Tracking
// =============================================================================

/// Count of admitted writes that have not reached a final state
#[derive(Debug, Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock();
        assert!(*count > 0, "in-flight write count underflow");
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn count(&self) -> usize {
        *self.count.lock()
    }

    fn wait_idle(&self, timeout: Duration) {
        let mut count = self.count.lock();
        while *count > 0 {
            if self.idle.wait_for(&mut count, timeout).timed_out() && *count > 0 {
                tracing::warn!(in_flight = *count, "still draining in-flight writes");
            }
        }
    }
}

// =============================================================================
// Pipeline Threads
// =============================================================================

/// Submit, log and wait threads of one device
pub(crate) struct Pipeline {
    submit_tx: Option<Sender<Arc<WriteIo>>>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Pipeline {
    pub(crate) fn start(shared: &Arc<Shared>, builder: LogpackBuilder) -> Result<Self> {
        let (submit_tx, submit_rx) = channel::unbounded();
        let (log_tx, log_rx) = channel::unbounded();
        let (wait_tx, wait_rx) = channel::unbounded();
        let mut handles = Vec::with_capacity(3);

        let s = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name("walblock-submit".to_string())
            .spawn(move || submit::run_submit(&s, builder, submit_rx, log_tx, wait_tx))?;
        handles.push(("submit", handle));

        let s = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name("walblock-log".to_string())
            .spawn(move || submit::run_log_io(&s, log_rx))?;
        handles.push(("log", handle));

        let s = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name("walblock-wait".to_string())
            .spawn(move || wait::run_wait(&s, wait_rx))?;
        handles.push(("wait", handle));

        Ok(Self {
            submit_tx: Some(submit_tx),
            handles,
        })
    }

    /// Queue an admitted write for the submit thread.
    pub(crate) fn enqueue(&self, io: Arc<WriteIo>) -> std::result::Result<(), Arc<WriteIo>> {
        match self.submit_tx.as_ref() {
            Some(tx) => tx.send(io).map_err(|e| e.into_inner()),
            None => Err(io),
        }
    }

    /// Close the submit queue and join the threads once they drained.
    pub(crate) fn stop(&mut self) {
        drop(self.submit_tx.take());
        for (stage, handle) in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!(stage, "pipeline thread panicked");
            }
        }
    }
}
