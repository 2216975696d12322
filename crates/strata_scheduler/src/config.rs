//! # Scheduler Configuration
//!
//! Loaded once at engine startup, usually from the `[scheduler]` table of
//! the engine TOML file.
//!
//! ```toml
//! worker_threads = 6          # optional, overrides the core-count policy
//! reserved_cores = 2          # cores left for the main and render threads
//! thread_name_prefix = "chunk-worker"
//! ```

use std::num::NonZeroUsize;

use serde::Deserialize;

use crate::error::{SchedulerError, SchedulerResult};

/// Worker pool sizing and naming.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Explicit worker count. `None` derives it from the core count.
    pub worker_threads: Option<usize>,
    /// Cores left free for the main/render threads when deriving the count.
    pub reserved_cores: usize,
    /// Worker thread name prefix (`<prefix>-<index>`).
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            reserved_cores: 2,
            thread_name_prefix: "chunk-worker".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Production config: leave the main and render threads a core each.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }

    /// Fixed worker count, mostly for tests and benchmarks.
    #[must_use]
    pub fn with_workers(workers: usize) -> Self {
        Self {
            worker_threads: Some(workers),
            ..Self::default()
        }
    }

    /// Parses a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConfig`] on parse or validation failure.
    pub fn from_toml_str(text: &str) -> SchedulerResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| SchedulerError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks field ranges.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConfig`] for a zero worker count or an
    /// empty thread name prefix.
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.worker_threads == Some(0) {
            return Err(SchedulerError::InvalidConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "thread_name_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of workers this config asks for on the current machine.
    #[must_use]
    pub fn resolve_worker_count(&self) -> usize {
        match self.worker_threads {
            Some(n) => n.max(1),
            None => {
                let cores = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
                worker_count_for(cores, self.reserved_cores)
            }
        }
    }
}

/// `max(cores - reserved, 1)`.
#[inline]
#[must_use]
pub const fn worker_count_for(cores: usize, reserved: usize) -> usize {
    let n = cores.saturating_sub(reserved);
    if n == 0 {
        1
    } else {
        n
    }
}
