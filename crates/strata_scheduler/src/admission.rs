//! # Admission Set
//!
//! Tracks which chunk identities are currently being processed.
//!
//! ## The Problem
//!
//! ```text
//! Thread A: contains(c)? no ──────────────┐
//! Thread B: contains(c)? no ──┐           │
//! Thread B: insert(c)         │           │
//! Thread A: insert(c)  ◄──────┴───────────┘  → c processed TWICE
//! ```
//!
//! ## The Solution
//!
//! The membership test, the capacity test and the insert happen under one
//! lock in [`AdmissionSet::try_admit`]. There is no separate "check" API
//! that callers could race on.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

/// Result of an admission attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// The id was inserted.
    Admitted,
    /// The id is already in flight.
    AlreadyInFlight,
    /// The set is at capacity.
    Saturated,
}

impl Admission {
    /// Returns true if the id was inserted.
    #[inline]
    #[must_use]
    pub const fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Thread-safe set of in-flight chunk identities.
#[derive(Debug)]
pub struct AdmissionSet<K> {
    in_flight: Mutex<HashSet<K>>,
}

impl<K: Eq + Hash> AdmissionSet<K> {
    /// Creates an empty set sized for `capacity` in-flight ids.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            in_flight: Mutex::new(HashSet::with_capacity(capacity)),
        }
    }

    /// Returns true if `id` is in flight.
    #[must_use]
    pub fn contains(&self, id: &K) -> bool {
        self.in_flight.lock().contains(id)
    }

    /// Number of ids in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Returns true if nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.in_flight.lock().is_empty()
    }

    /// Inserts `id` iff it is absent and fewer than `capacity` ids are in
    /// flight. One atomic decision.
    pub fn try_admit(&self, id: K, capacity: usize) -> Admission {
        let mut set = self.in_flight.lock();
        if set.contains(&id) {
            Admission::AlreadyInFlight
        } else if set.len() >= capacity {
            Admission::Saturated
        } else {
            set.insert(id);
            Admission::Admitted
        }
    }

    /// Removes `id`. Returns true if it was present.
    pub fn release(&self, id: &K) -> bool {
        self.in_flight.lock().remove(id)
    }
}

impl<K: Eq + Hash + Clone> AdmissionSet<K> {
    /// Admits `id` and returns a guard that releases it on drop.
    ///
    /// The guard is the only way the scheduler releases slots, so a
    /// panicking job still frees its id during unwinding.
    pub fn admit_guarded(
        self: &Arc<Self>,
        id: K,
        capacity: usize,
    ) -> Result<AdmissionGuard<K>, Admission> {
        match self.try_admit(id.clone(), capacity) {
            Admission::Admitted => Ok(AdmissionGuard {
                set: Arc::clone(self),
                id: Some(id),
            }),
            refused => Err(refused),
        }
    }
}

/// Releases an admitted id when dropped.
#[derive(Debug)]
pub struct AdmissionGuard<K: Eq + Hash> {
    set: Arc<AdmissionSet<K>>,
    id: Option<K>,
}

impl<K: Eq + Hash> AdmissionGuard<K> {
    /// The guarded id.
    #[must_use]
    pub fn id(&self) -> &K {
        self.id.as_ref().unwrap_or_else(|| unreachable!("guard already released"))
    }

    /// Releases the slot now.
    pub fn release(mut self) {
        if let Some(id) = self.id.take() {
            self.set.release(&id);
        }
    }
}

impl<K: Eq + Hash> Drop for AdmissionGuard<K> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.set.release(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_admit_and_release() {
        let set = AdmissionSet::with_capacity(2);
        assert!(set.is_empty());

        assert_eq!(set.try_admit(1u32, 2), Admission::Admitted);
        assert!(set.contains(&1));
        assert_eq!(set.len(), 1);

        assert!(set.release(&1));
        assert!(!set.release(&1));
        assert!(set.is_empty());
    }

    #[test]
    fn test_duplicate_refused() {
        let set = AdmissionSet::with_capacity(4);
        assert!(set.try_admit(7u32, 4).is_admitted());
        assert_eq!(set.try_admit(7u32, 4), Admission::AlreadyInFlight);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_capacity_refused() {
        let set = AdmissionSet::with_capacity(2);
        assert!(set.try_admit(1u32, 2).is_admitted());
        assert!(set.try_admit(2u32, 2).is_admitted());
        assert_eq!(set.try_admit(3u32, 2), Admission::Saturated);

        // Duplicate check wins over capacity check.
        assert_eq!(set.try_admit(1u32, 2), Admission::AlreadyInFlight);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let set = Arc::new(AdmissionSet::with_capacity(1));
        {
            let guard = set.admit_guarded(5u32, 1).unwrap();
            assert_eq!(*guard.id(), 5);
            assert!(set.contains(&5));
            assert_eq!(set.admit_guarded(6u32, 1).unwrap_err(), Admission::Saturated);
        }
        assert!(set.is_empty());

        let guard = set.admit_guarded(5u32, 1).unwrap();
        guard.release();
        assert!(set.is_empty());
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let set = Arc::new(AdmissionSet::with_capacity(1));
        let worker_set = Arc::clone(&set);

        let result = thread::spawn(move || {
            let _guard = worker_set.admit_guarded(9u32, 1).unwrap();
            panic!("chunk exploded");
        })
        .join();

        assert!(result.is_err());
        assert!(set.is_empty());
    }

    #[test]
    fn test_concurrent_same_id_admits_once() {
        let set = Arc::new(AdmissionSet::with_capacity(16));
        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));
        let admitted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let set = Arc::clone(&set);
                let barrier = Arc::clone(&barrier);
                let admitted = Arc::clone(&admitted);
                thread::spawn(move || {
                    barrier.wait();
                    if set.try_admit(42u32, 16).is_admitted() {
                        admitted.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_concurrent_distinct_ids_respect_capacity() {
        let capacity = 3;
        let set = Arc::new(AdmissionSet::with_capacity(capacity));
        let threads = 32;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let set = Arc::clone(&set);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    set.try_admit(i, capacity).is_admitted()
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(admitted, capacity);
        assert_eq!(set.len(), capacity);
    }
}
