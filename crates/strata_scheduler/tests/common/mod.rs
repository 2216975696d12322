//! Shared fixtures for scheduler integration tests.

#![allow(dead_code, missing_docs)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use strata_scheduler::{Chunk, ChunkError, ManualClock};

/// Generous bound for anything that waits on workers.
pub const WAIT: Duration = Duration::from_secs(10);

/// One-shot gate: `wait()` blocks until `open()`.
#[derive(Default)]
pub struct Latch {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.cv.notify_all();
    }

    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cv.wait(&mut open);
        }
    }
}

/// What `process()` does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessBehavior {
    Changed,
    Unchanged,
    Fail,
    Panic,
}

/// What `finalize()` does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizeBehavior {
    Ok,
    Fail,
    Panic,
}

/// Observations shared by every chunk of one test.
#[derive(Default)]
pub struct Probe {
    /// Ids in `finalize()` call order.
    pub finalized: Mutex<Vec<u32>>,
    /// `process()` calls currently running, across all chunks.
    pub running: AtomicUsize,
    /// Highest value `running` reached.
    pub peak_running: AtomicUsize,
    /// Times a chunk saw itself processed concurrently.
    pub overlaps: AtomicUsize,
    /// Completed `process()` calls.
    pub processed: AtomicUsize,
    /// `finalize()` calls currently running, across all chunks.
    pub finalizing: AtomicUsize,
    /// Times a `finalize()` started while another was running.
    pub finalize_overlaps: AtomicUsize,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn finalized(&self) -> Vec<u32> {
        self.finalized.lock().clone()
    }
}

pub struct TestChunk {
    pub id: u32,
    pub priority: i32,
    pub process: ProcessBehavior,
    pub finalize: FinalizeBehavior,
    pub gate: Option<Arc<Latch>>,
    pub work: Option<(Arc<ManualClock>, Duration)>,
    pub spin: Duration,
    pub finalize_spin: Duration,
    active: AtomicUsize,
    probe: Arc<Probe>,
}

impl TestChunk {
    pub fn new(id: u32, priority: i32, probe: &Arc<Probe>) -> Self {
        Self {
            id,
            priority,
            process: ProcessBehavior::Changed,
            finalize: FinalizeBehavior::Ok,
            gate: None,
            work: None,
            spin: Duration::ZERO,
            finalize_spin: Duration::ZERO,
            active: AtomicUsize::new(0),
            probe: Arc::clone(probe),
        }
    }

    pub fn on_process(mut self, behavior: ProcessBehavior) -> Self {
        self.process = behavior;
        self
    }

    pub fn on_finalize(mut self, behavior: FinalizeBehavior) -> Self {
        self.finalize = behavior;
        self
    }

    pub fn gated(mut self, gate: &Arc<Latch>) -> Self {
        self.gate = Some(Arc::clone(gate));
        self
    }

    /// Advances `clock` by `d` inside `process()`.
    pub fn takes(mut self, clock: &Arc<ManualClock>, d: Duration) -> Self {
        self.work = Some((Arc::clone(clock), d));
        self
    }

    /// Sleeps for `d` inside `process()`.
    pub fn sleeps(mut self, d: Duration) -> Self {
        self.spin = d;
        self
    }

    /// Sleeps for `d` inside `finalize()`.
    pub fn finalize_sleeps(mut self, d: Duration) -> Self {
        self.finalize_spin = d;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl Chunk for TestChunk {
    type Id = u32;
    type Priority = i32;

    fn id(&self) -> u32 {
        self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn process(&self) -> Result<bool, ChunkError> {
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.probe.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let running = self.probe.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.peak_running.fetch_max(running, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.wait();
        }
        if let Some((clock, d)) = &self.work {
            clock.advance(*d);
        }
        if !self.spin.is_zero() {
            std::thread::sleep(self.spin);
        }

        self.probe.running.fetch_sub(1, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.probe.processed.fetch_add(1, Ordering::SeqCst);

        match self.process {
            ProcessBehavior::Changed => Ok(true),
            ProcessBehavior::Unchanged => Ok(false),
            ProcessBehavior::Fail => Err(ChunkError::msg("terrain generation failed")),
            ProcessBehavior::Panic => panic!("mesher blew up on chunk {}", self.id),
        }
    }

    fn finalize(&self) -> Result<(), ChunkError> {
        if self.probe.finalizing.fetch_add(1, Ordering::SeqCst) > 0 {
            self.probe.finalize_overlaps.fetch_add(1, Ordering::SeqCst);
        }
        if !self.finalize_spin.is_zero() {
            std::thread::sleep(self.finalize_spin);
        }
        self.probe.finalizing.fetch_sub(1, Ordering::SeqCst);

        match self.finalize {
            FinalizeBehavior::Ok => {
                self.probe.finalized.lock().push(self.id);
                Ok(())
            }
            FinalizeBehavior::Fail => Err(ChunkError::msg("vbo upload failed")),
            FinalizeBehavior::Panic => panic!("gpu lost on chunk {}", self.id),
        }
    }
}
