//! # Chunk Scheduler
//!
//! Admission control, background processing and render-thread hand-off.
//!
//! ## Architecture
//!
//! ```text
//!                 submit(chunk)
//!                      │
//!            ┌─────────▼─────────┐   refused: already in flight / saturated
//!            │   AdmissionSet    │──────────────────────────────► false
//!            └─────────┬─────────┘
//!                      │ admitted (slot guard)
//!            ┌─────────▼─────────┐
//!            │    WorkerPool     │  N = max(cores - 2, 1)
//!            │  chunk.process()  │
//!            └────┬─────────┬────┘
//!        changed  │         │  unchanged / failed
//!   ┌─────────────▼───┐     │
//!   │ FinalizationQ   │     │
//!   └─────────┬───────┘     ▼
//!             │        slot released, average updated
//!             ▼
//!   drain() on the consumer thread → chunk.finalize()
//! ```
//!
//! ## Thread Safety
//!
//! - `submit()`: any thread, never blocks on capacity.
//! - `drain()`: one consumer thread. The first thread to drain is bound;
//!   other threads get [`SchedulerError::ForeignConsumer`]. Rebinding
//!   waits for a drain in progress, so finalizations never overlap.
//! - Accessors: any thread, snapshots only.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::admission::{Admission, AdmissionGuard, AdmissionSet};
use crate::chunk::Chunk;
use crate::clock::{Clock, MonotonicClock};
use crate::config::SchedulerConfig;
use crate::error::{panic_message, SchedulerError, SchedulerResult};
use crate::metrics::{DurationAverage, SchedulerStats, StatCounters};
use crate::pool::WorkerPool;
use crate::queue::FinalizationQueue;

/// What happened to a submit request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Dispatched to a worker.
    Accepted,
    /// The same chunk is being processed right now.
    AlreadyInFlight,
    /// All worker slots are taken.
    Saturated,
    /// The scheduler was shut down.
    ShutDown,
}

impl SubmitOutcome {
    /// Returns true if the request was dispatched.
    #[inline]
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

impl From<Admission> for SubmitOutcome {
    fn from(admission: Admission) -> Self {
        match admission {
            Admission::Admitted => Self::Accepted,
            Admission::AlreadyInFlight => Self::AlreadyInFlight,
            Admission::Saturated => Self::Saturated,
        }
    }
}

/// Result of one `drain()` call.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Chunks finalized successfully.
    pub finalized: usize,
    /// Chunks whose `finalize()` errored or panicked, in pop order.
    pub failures: Vec<SchedulerError>,
}

impl DrainReport {
    /// Chunks popped from the queue during this drain.
    #[inline]
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.finalized + self.failures.len()
    }

    /// Returns true if every finalize succeeded.
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Counts jobs from admission until their metric update is done.
#[derive(Debug, Default)]
struct Outstanding {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Outstanding {
    fn begin(self: &Arc<Self>) -> OutstandingTicket {
        *self.count.lock() += 1;
        OutstandingTicket {
            outstanding: Arc::clone(self),
        }
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        // Past the representable range: no deadline.
        let deadline = Instant::now().checked_add(timeout);
        let mut count = self.count.lock();
        while *count > 0 {
            match deadline {
                Some(deadline) => {
                    if self.idle.wait_until(&mut count, deadline).timed_out() {
                        return *count == 0;
                    }
                }
                None => self.idle.wait(&mut count),
            }
        }
        true
    }
}

struct OutstandingTicket {
    outstanding: Arc<Outstanding>,
}

impl Drop for OutstandingTicket {
    fn drop(&mut self) {
        let mut count = self.outstanding.count.lock();
        *count -= 1;
        if *count == 0 {
            self.outstanding.idle.notify_all();
        }
    }
}

/// State shared between the scheduler and its jobs.
struct Shared<C: Chunk, K> {
    admission: Arc<AdmissionSet<C::Id>>,
    queue: FinalizationQueue<C::Priority, Arc<C>>,
    average: DurationAverage,
    counters: StatCounters,
    outstanding: Arc<Outstanding>,
    clock: K,
}

impl<C: Chunk, K: Clock> Shared<C, K> {
    /// Worker task body.
    fn run(&self, chunk: &Arc<C>, slot: AdmissionGuard<C::Id>, ticket: OutstandingTicket) {
        let start = self.clock.now();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            chunk
                .process()
                .map(|changed| changed.then(|| chunk.priority()))
        }));

        match outcome {
            Ok(Ok(Some(priority))) => {
                self.queue.push(priority, Arc::clone(chunk));
                StatCounters::bump(&self.counters.changed);
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                StatCounters::bump(&self.counters.process_failures);
                let error = SchedulerError::ProcessFailed {
                    chunk: format!("{:?}", slot.id()),
                    reason: e.to_string(),
                };
                tracing::warn!(%error, "chunk update dropped");
            }
            Err(payload) => {
                StatCounters::bump(&self.counters.process_failures);
                let error = SchedulerError::ProcessPanicked {
                    chunk: format!("{:?}", slot.id()),
                    message: panic_message(payload.as_ref()),
                };
                tracing::error!(%error, "chunk update dropped");
            }
        }

        slot.release();

        let elapsed = self.clock.now().saturating_duration_since(start);
        let average_ms = self.average.record(elapsed);
        StatCounters::bump(&self.counters.processed);
        tracing::trace!(?elapsed, average_ms, "chunk job done");

        drop(ticket);
    }
}

/// Schedules chunk updates on a bounded worker pool and hands changed
/// chunks back to one consumer thread.
///
/// ## Usage
///
/// ```rust,ignore
/// let scheduler = ChunkScheduler::new(&SchedulerConfig::production())?;
///
/// // Engine tick
/// loop {
///     for chunk in dirty_chunks_near_player() {
///         // Refused chunks are simply retried next tick.
///         scheduler.submit(Arc::clone(chunk));
///     }
///
///     // Render thread: upload everything that finished
///     scheduler.drain()?;
/// }
/// ```
pub struct ChunkScheduler<C: Chunk, K: Clock = MonotonicClock> {
    shared: Arc<Shared<C, K>>,
    pool: WorkerPool,
    capacity: usize,
    consumer: Mutex<Option<ThreadId>>,
    /// Held for the whole of a drain; rebinding waits on it.
    drain_lock: Mutex<()>,
}

impl<C: Chunk> ChunkScheduler<C, MonotonicClock> {
    /// Creates a scheduler timed by the monotonic wall clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or workers fail to spawn.
    pub fn new(config: &SchedulerConfig) -> SchedulerResult<Self> {
        Self::with_clock(config, MonotonicClock)
    }
}

impl<C: Chunk, K: Clock> ChunkScheduler<C, K> {
    /// Creates a scheduler timed by `clock`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or workers fail to spawn.
    pub fn with_clock(config: &SchedulerConfig, clock: K) -> SchedulerResult<Self> {
        config.validate()?;
        let capacity = config.resolve_worker_count();
        let pool = WorkerPool::new(capacity, &config.thread_name_prefix)?;

        let shared = Arc::new(Shared {
            admission: Arc::new(AdmissionSet::with_capacity(capacity)),
            queue: FinalizationQueue::new(),
            average: DurationAverage::new(),
            counters: StatCounters::default(),
            outstanding: Arc::new(Outstanding::default()),
            clock,
        });

        Ok(Self {
            shared,
            pool,
            capacity,
            consumer: Mutex::new(None),
            drain_lock: Mutex::new(()),
        })
    }

    /// Requests a background update of `chunk`.
    ///
    /// Returns `false` if the chunk is already in flight, all worker slots
    /// are busy or the scheduler is shut down. Nothing is queued for later:
    /// the caller resubmits on a future tick if the update is still needed.
    pub fn submit(&self, chunk: Arc<C>) -> bool {
        self.submit_with_outcome(chunk).is_accepted()
    }

    /// Like [`submit`](Self::submit), but says why a request was refused.
    pub fn submit_with_outcome(&self, chunk: Arc<C>) -> SubmitOutcome {
        let counters = &self.shared.counters;
        StatCounters::bump(&counters.submitted);

        if self.pool.is_shut_down() {
            StatCounters::bump(&counters.rejected_shut_down);
            return SubmitOutcome::ShutDown;
        }

        let id = chunk.id();
        let slot = match self.shared.admission.admit_guarded(id, self.capacity) {
            Ok(slot) => slot,
            Err(refused) => {
                let outcome = SubmitOutcome::from(refused);
                match outcome {
                    SubmitOutcome::AlreadyInFlight => {
                        StatCounters::bump(&counters.rejected_in_flight);
                    }
                    _ => StatCounters::bump(&counters.rejected_saturated),
                }
                tracing::trace!(chunk = ?chunk.id(), ?outcome, "chunk update refused");
                return outcome;
            }
        };

        tracing::debug!(chunk = ?slot.id(), "chunk update admitted");

        let ticket = self.shared.outstanding.begin();
        let shared = Arc::clone(&self.shared);
        // On failure the closure is dropped, which releases slot and ticket.
        match self.pool.execute(move || shared.run(&chunk, slot, ticket)) {
            Ok(()) => {
                StatCounters::bump(&counters.accepted);
                SubmitOutcome::Accepted
            }
            Err(_) => {
                StatCounters::bump(&counters.rejected_shut_down);
                SubmitOutcome::ShutDown
            }
        }
    }

    /// Finalizes every chunk waiting in the queue, highest priority first.
    ///
    /// Stops as soon as the queue is observed empty; chunks pushed after
    /// that are left for the next call. A failing `finalize()` is reported
    /// in the returned report and does not stop the drain.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::ForeignConsumer`] when called from a thread
    /// other than the bound consumer thread.
    pub fn drain(&self) -> SchedulerResult<DrainReport> {
        self.drain_budget(usize::MAX)
    }

    /// Like [`drain`](Self::drain), but finalizes at most `max` chunks.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::ForeignConsumer`] when called from a thread
    /// other than the bound consumer thread.
    pub fn drain_budget(&self, max: usize) -> SchedulerResult<DrainReport> {
        let _draining = self.drain_lock.lock();
        self.check_consumer()?;

        let counters = &self.shared.counters;
        let mut report = DrainReport::default();

        while report.attempted() < max {
            let Some(chunk) = self.shared.queue.pop() else {
                break;
            };

            match panic::catch_unwind(AssertUnwindSafe(|| chunk.finalize())) {
                Ok(Ok(())) => {
                    report.finalized += 1;
                    StatCounters::bump(&counters.finalized);
                }
                Ok(Err(e)) => {
                    StatCounters::bump(&counters.finalize_failures);
                    tracing::error!(chunk = ?chunk.id(), error = %e, "chunk finalize failed");
                    report.failures.push(SchedulerError::FinalizeFailed {
                        chunk: format!("{:?}", chunk.id()),
                        reason: e.to_string(),
                    });
                }
                Err(payload) => {
                    StatCounters::bump(&counters.finalize_failures);
                    let message = panic_message(payload.as_ref());
                    tracing::error!(
                        chunk = ?chunk.id(),
                        panic = %message,
                        "chunk finalize panicked"
                    );
                    report.failures.push(SchedulerError::FinalizePanicked {
                        chunk: format!("{:?}", chunk.id()),
                        message,
                    });
                }
            }
        }

        if report.attempted() > 0 {
            tracing::debug!(
                finalized = report.finalized,
                failed = report.failures.len(),
                "finalization drain"
            );
        }

        Ok(report)
    }

    /// Binds the calling thread as the consumer thread.
    ///
    /// `drain()` binds automatically on first use; call this to move
    /// finalization to another thread explicitly. Blocks until a drain in
    /// progress on the previous consumer has finished.
    pub fn bind_consumer(&self) {
        let _draining = self.drain_lock.lock();
        *self.consumer.lock() = Some(thread::current().id());
    }

    fn check_consumer(&self) -> SchedulerResult<()> {
        let current = thread::current().id();
        let mut consumer = self.consumer.lock();
        match *consumer {
            None => {
                *consumer = Some(current);
                Ok(())
            }
            Some(bound) if bound == current => Ok(()),
            Some(_) => Err(SchedulerError::ForeignConsumer),
        }
    }

    /// Chunks waiting for finalization (snapshot).
    #[must_use]
    pub fn pending_finalization_count(&self) -> usize {
        self.shared.queue.len()
    }

    /// Moving average of `process()` durations in milliseconds (snapshot).
    #[must_use]
    pub fn average_processing_ms(&self) -> f64 {
        self.shared.average.get_ms()
    }

    /// Chunks currently being processed (snapshot).
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.shared.admission.len()
    }

    /// Returns true if `id` is currently being processed.
    #[must_use]
    pub fn is_in_flight(&self, id: &C::Id) -> bool {
        self.shared.admission.contains(id)
    }

    /// Maximum chunks in flight; equals the worker count.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.shared.counters.snapshot()
    }

    /// Blocks until every accepted job has finished, or `timeout` passes.
    ///
    /// Returns true if the scheduler went idle. Intended for tests, tools
    /// and orderly shutdown; the frame loop should never wait on workers.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.shared.outstanding.wait_idle(timeout)
    }

    /// Stops accepting work, lets running jobs finish and joins the workers.
    ///
    /// Chunks already in the finalization queue stay drainable.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    /// Returns true once [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.pool.is_shut_down()
    }
}

impl<C: Chunk, K: Clock> std::fmt::Debug for ChunkScheduler<C, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkScheduler")
            .field("capacity", &self.capacity)
            .field("in_flight", &self.in_flight_count())
            .field("pending_finalization", &self.pending_finalization_count())
            .field("pool", &self.pool)
            .finish()
    }
}
