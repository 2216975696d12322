//! # Worker Pool
//!
//! Fixed set of named background threads fed by one MPMC job channel.
//!
//! ```text
//!   submit() ──> [crossbeam unbounded channel] ──┬──> chunk-worker-0
//!                                                ├──> chunk-worker-1
//!                                                └──> chunk-worker-N
//! ```
//!
//! The pool itself applies no backpressure: the scheduler never sends more
//! jobs than it has admission slots for.
//!
//! ## Lifecycle
//!
//! `shutdown()` closes the channel; each worker finishes the jobs already
//! queued, sees the disconnect and exits; then the threads are joined.
//! Dropping the pool does the same.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{panic_message, SchedulerError, SchedulerResult};

/// A unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size thread pool.
pub struct WorkerPool {
    /// `None` once shut down.
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawns `size` workers named `<prefix>-<index>`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::WorkerSpawn`] if the OS refuses a thread.
    /// Workers spawned before the failure are shut down again.
    pub fn new(size: usize, prefix: &str) -> SchedulerResult<Self> {
        let size = size.max(1);
        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(size);

        for index in 0..size {
            let rx = receiver.clone();
            let spawned = thread::Builder::new()
                .name(format!("{prefix}-{index}"))
                .spawn(move || Self::worker_loop(index, &rx));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    drop(sender);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(SchedulerError::WorkerSpawn {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(workers = size, prefix, "worker pool started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            size,
        })
    }

    /// Worker thread main loop.
    fn worker_loop(index: usize, receiver: &Receiver<Job>) {
        tracing::debug!(worker = index, "worker started");

        for job in receiver {
            // Jobs do their own cleanup; this only keeps the thread alive.
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                tracing::error!(
                    worker = index,
                    panic = %panic_message(payload.as_ref()),
                    "job panicked"
                );
            }
        }

        tracing::debug!(worker = index, "worker stopped");
    }

    /// Number of worker threads.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs waiting for a free worker.
    #[must_use]
    pub fn queued_jobs(&self) -> usize {
        self.sender.lock().as_ref().map_or(0, Sender::len)
    }

    /// Returns true once `shutdown()` has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Queues a job for execution on some worker.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::ShutDown`] after shutdown.
    pub fn execute<F>(&self, job: F) -> SchedulerResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(SchedulerError::ShutDown)?;
        sender
            .send(Box::new(job))
            .map_err(|_| SchedulerError::ShutDown)
    }

    /// Stops accepting jobs, lets queued jobs finish and joins all workers.
    ///
    /// Idempotent. When called from one of the pool's own workers, that
    /// worker is detached instead of joined.
    pub fn shutdown(&self) {
        let Some(sender) = self.sender.lock().take() else {
            return;
        };
        drop(sender);

        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("worker thread exited abnormally");
            }
        }

        tracing::info!(workers = self.size, "worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
