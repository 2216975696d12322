//! # Chunk Contract
//!
//! The scheduler never looks inside a chunk. It only needs:
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────────────────────┐
//! │ id()         │ identity for the in-flight set (Eq + Hash)       │
//! │ priority()   │ finalization order, read once at push time       │
//! │ process()    │ worker thread, returns true if output changed    │
//! │ finalize()   │ consumer thread only, GPU-visible commit         │
//! └──────────────┴──────────────────────────────────────────────────┘
//! ```

use std::fmt::Debug;
use std::hash::Hash;

use crate::error::ChunkError;

/// A unit of world content that can be reprocessed and finalized.
///
/// Implementations are shared between the submitting thread, one worker
/// and the consumer thread through an `Arc`, so any mutable state inside
/// must use interior mutability.
///
/// # Contract
///
/// - `id()` must be stable for the lifetime of the chunk.
/// - `priority()` must not change while the chunk waits for finalization.
/// - `process()` is never called concurrently with itself for one id.
/// - `finalize()` is only called after `process()` returned `Ok(true)`.
pub trait Chunk: Send + Sync + 'static {
    /// Identity used for in-flight deduplication.
    type Id: Eq + Hash + Clone + Debug + Send + Sync + 'static;

    /// Finalization ordering key. Higher values finalize first.
    type Priority: Ord + Send + Sync + 'static;

    /// Returns the chunk identity.
    fn id(&self) -> Self::Id;

    /// Returns the current finalization priority.
    fn priority(&self) -> Self::Priority;

    /// Performs the content work.
    ///
    /// Returns `Ok(true)` iff the output changed and finalization is needed.
    ///
    /// # Errors
    ///
    /// Any error is logged by the scheduler; the chunk is not finalized.
    fn process(&self) -> Result<bool, ChunkError>;

    /// Commits the processed result. Runs on the consumer thread.
    ///
    /// # Errors
    ///
    /// Errors are reported in the drain report; draining continues.
    fn finalize(&self) -> Result<(), ChunkError>;
}
