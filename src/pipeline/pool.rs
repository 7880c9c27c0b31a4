//! Worker pool
//!
//! Fixed set of named threads pulling boxed jobs off a crossbeam channel.
//! Used for data-device writes (plus GC) and, separately, for reads so that
//! slow pending writes never starve independent reads.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::Result;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Named pool of worker threads
pub struct WorkerPool {
    name: &'static str,
    tx: Mutex<Option<Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `threads` workers named `<name>-<n>`.
    pub fn new(name: &'static str, threads: usize) -> Result<Self> {
        let (tx, rx) = channel::unbounded::<Job>();
        let mut handles = Vec::with_capacity(threads);
        for n in 0..threads {
            let rx: Receiver<Job> = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{n}"))
                .spawn(move || {
                    for job in rx.iter() {
                        job();
                    }
                })?;
            handles.push(handle);
        }
        tracing::debug!(pool = name, threads, "worker pool started");
        Ok(Self {
            name,
            tx: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
        })
    }

    /// Queue `job`. After shutdown the job runs on the calling thread so no
    /// work is ever dropped.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(job);
        let job = match self.tx.lock().as_ref() {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                Err(e) => e.into_inner(),
            },
            None => job,
        };
        tracing::warn!(pool = self.name, "pool stopped, running job inline");
        job();
    }

    /// Stop accepting jobs, drain the queue and join every worker.
    pub fn shutdown(&self) {
        drop(self.tx.lock().take());
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!(pool = self.name, "worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
