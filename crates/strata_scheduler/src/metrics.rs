//! # Scheduler Metrics
//!
//! Observational only: nothing here feeds back into admission decisions.
//!
//! The processing-time average is an EWMA with weight 0.5:
//!
//! ```text
//! avg' = (avg + sample) / 2        seed: 0.0
//! ```
//!
//! Workers update it concurrently, so the read-modify-write is a CAS loop
//! over the `f64` bit pattern. A plain load/store pair would drop samples.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lock-free moving average of processing durations, in milliseconds.
#[derive(Debug)]
pub struct DurationAverage {
    bits: AtomicU64,
}

impl DurationAverage {
    /// Creates an average seeded at 0.0.
    #[must_use]
    pub const fn new() -> Self {
        Self { bits: AtomicU64::new(0) } // 0u64 is the bit pattern of 0.0f64
    }

    /// Folds one sample into the average and returns the new value.
    pub fn record(&self, sample: Duration) -> f64 {
        let sample_ms = duration_ms(sample);
        let previous = self
            .bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some(((f64::from_bits(bits) + sample_ms) / 2.0).to_bits())
            })
            .unwrap_or_else(|bits| bits);
        (f64::from_bits(previous) + sample_ms) / 2.0
    }

    /// Current average in milliseconds.
    #[inline]
    #[must_use]
    pub fn get_ms(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

impl Default for DurationAverage {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a duration to fractional milliseconds.
///
/// Goes through nanoseconds so whole-millisecond durations convert exactly.
#[allow(clippy::cast_precision_loss)]
#[inline]
#[must_use]
pub fn duration_ms(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

/// Snapshot of scheduler counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Calls to submit.
    pub submitted: u64,
    /// Submits that were dispatched to the pool.
    pub accepted: u64,
    /// Submits refused because the chunk was already in flight.
    pub rejected_in_flight: u64,
    /// Submits refused because the pool was saturated.
    pub rejected_saturated: u64,
    /// Submits refused after shutdown.
    pub rejected_shut_down: u64,
    /// `process()` calls that completed (successfully or not).
    pub processed: u64,
    /// `process()` calls that returned `Ok(true)`.
    pub changed: u64,
    /// `process()` calls that errored or panicked.
    pub process_failures: u64,
    /// Successful `finalize()` calls.
    pub finalized: u64,
    /// `finalize()` calls that errored or panicked.
    pub finalize_failures: u64,
}

impl SchedulerStats {
    /// Fraction of submits that were accepted (0.0 when nothing submitted).
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn acceptance_rate(&self) -> f64 {
        if self.submitted == 0 {
            0.0
        } else {
            self.accepted as f64 / self.submitted as f64
        }
    }
}

/// Live counters behind [`SchedulerStats`].
#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    pub submitted: AtomicU64,
    pub accepted: AtomicU64,
    pub rejected_in_flight: AtomicU64,
    pub rejected_saturated: AtomicU64,
    pub rejected_shut_down: AtomicU64,
    pub processed: AtomicU64,
    pub changed: AtomicU64,
    pub process_failures: AtomicU64,
    pub finalized: AtomicU64,
    pub finalize_failures: AtomicU64,
}

impl StatCounters {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected_in_flight: self.rejected_in_flight.load(Ordering::Relaxed),
            rejected_saturated: self.rejected_saturated.load(Ordering::Relaxed),
            rejected_shut_down: self.rejected_shut_down.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            changed: self.changed.load(Ordering::Relaxed),
            process_failures: self.process_failures.load(Ordering::Relaxed),
            finalized: self.finalized.load(Ordering::Relaxed),
            finalize_failures: self.finalize_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_average_recurrence() {
        let avg = DurationAverage::new();
        assert_eq!(avg.get_ms(), 0.0);

        assert_eq!(avg.record(Duration::from_millis(10)), 5.0);
        assert_eq!(avg.record(Duration::from_millis(20)), 12.5);
        assert_eq!(avg.record(Duration::from_millis(30)), 21.25);
        assert_eq!(avg.get_ms(), 21.25);
    }

    #[test]
    fn test_duration_ms_sub_millisecond() {
        assert_eq!(duration_ms(Duration::from_micros(500)), 0.5);
        assert_eq!(duration_ms(Duration::ZERO), 0.0);
    }

    #[test]
    fn test_concurrent_identical_samples_converge() {
        // With every sample equal to S, the average after k samples is
        // S * (1 - 2^-k) regardless of interleaving, as long as no update
        // is lost.
        let avg = Arc::new(DurationAverage::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let avg = Arc::clone(&avg);
                thread::spawn(move || {
                    for _ in 0..8 {
                        avg.record(Duration::from_millis(64));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let expected = 64.0 * (1.0 - 0.5f64.powi(64));
        assert!((avg.get_ms() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_acceptance_rate() {
        let stats = SchedulerStats {
            submitted: 4,
            accepted: 3,
            ..SchedulerStats::default()
        };
        assert!((stats.acceptance_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(SchedulerStats::default().acceptance_rate(), 0.0);
    }
}
