//! # Scheduler Error Types
//!
//! All errors that can occur in the chunk scheduler.

use thiserror::Error;

/// Errors reported by chunk implementations from `process()` or `finalize()`.
#[derive(Error, Debug)]
pub enum ChunkError {
    /// Generic failure with a human readable reason.
    #[error("{0}")]
    Message(String),

    /// Failure wrapping an underlying error.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ChunkError {
    /// Creates a message error.
    #[must_use]
    pub fn msg(reason: impl Into<String>) -> Self {
        Self::Message(reason.into())
    }
}

/// Errors that can occur in the scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The scheduler (or its worker pool) has been shut down.
    #[error("scheduler is shut down")]
    ShutDown,

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread {index}: {reason}")]
    WorkerSpawn {
        /// Worker index.
        index: usize,
        /// OS error text.
        reason: String,
    },

    /// `process()` returned an error.
    #[error("process failed for chunk {chunk}: {reason}")]
    ProcessFailed {
        /// Debug rendering of the chunk id.
        chunk: String,
        /// Error text.
        reason: String,
    },

    /// `process()` panicked.
    #[error("process panicked for chunk {chunk}: {message}")]
    ProcessPanicked {
        /// Debug rendering of the chunk id.
        chunk: String,
        /// Panic payload, if it was a string.
        message: String,
    },

    /// `finalize()` returned an error.
    #[error("finalize failed for chunk {chunk}: {reason}")]
    FinalizeFailed {
        /// Debug rendering of the chunk id.
        chunk: String,
        /// Error text.
        reason: String,
    },

    /// `finalize()` panicked.
    #[error("finalize panicked for chunk {chunk}: {message}")]
    FinalizePanicked {
        /// Debug rendering of the chunk id.
        chunk: String,
        /// Panic payload, if it was a string.
        message: String,
    },

    /// `drain()` was called from a thread other than the bound consumer.
    #[error("drain called from a thread other than the consumer thread")]
    ForeignConsumer,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
