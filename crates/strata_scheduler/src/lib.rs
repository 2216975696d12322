//! # STRATA Chunk Scheduler
//!
//! Decides which world chunks are reprocessed in the background, bounds how
//! much of that work is in flight, and hands finished chunks back to the
//! render thread for GPU-visible finalization.
//!
//! ## Architecture Rules
//!
//! 1. **Never block the frame** - `submit()` refuses instead of waiting
//! 2. **One worker per chunk** - the admission set deduplicates in-flight ids
//! 3. **Bounded concurrency** - at most N chunks in flight, N = worker count
//! 4. **Single consumer** - `finalize()` only ever runs on one thread
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_scheduler::{ChunkScheduler, SchedulerConfig};
//!
//! let scheduler = ChunkScheduler::new(&SchedulerConfig::production())?;
//!
//! // Background: mesh the chunk if a worker slot is free
//! scheduler.submit(Arc::clone(&chunk));
//!
//! // Render thread, once per frame
//! let report = scheduler.drain()?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod admission;
pub mod chunk;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod scheduler;

pub use admission::{Admission, AdmissionGuard, AdmissionSet};
pub use chunk::Chunk;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{worker_count_for, SchedulerConfig};
pub use error::{ChunkError, SchedulerError, SchedulerResult};
pub use metrics::{DurationAverage, SchedulerStats};
pub use pool::WorkerPool;
pub use queue::FinalizationQueue;
pub use scheduler::{ChunkScheduler, DrainReport, SubmitOutcome};
