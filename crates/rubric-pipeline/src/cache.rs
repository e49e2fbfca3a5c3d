//! Result cache and per-submission leases.
//!
//! The cache is the datastore itself: the most recent analysis for a
//! submission is the cached answer. Leases serialize concurrent grading of
//! the same submission inside one process so the second caller finds the
//! first caller's result instead of paying for another completion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use rubric_grading::AnalysisResult;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::Result;
use crate::store::Datastore;

/// Lookup of previously computed analyses.
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn Datastore>,
}

impl ResultCache {
    /// Creates a cache over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }

    /// Returns the most recent analysis for `submission_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RubricError::Store`] if the datastore fails.
    pub async fn lookup(&self, submission_id: &str) -> Result<Option<AnalysisResult>> {
        let hit = self.store.latest_analysis(submission_id).await?;
        debug!(submission_id, hit = hit.is_some(), "cache lookup");
        Ok(hit)
    }
}

#[derive(Debug, Default)]
struct LeaseSlot {
    lock: Arc<AsyncMutex<()>>,
    // Holders plus waiters, including waiters whose future is later dropped.
    users: usize,
}

type LeaseMap = Mutex<HashMap<String, LeaseSlot>>;

/// Per-submission async locks.
///
/// Entries are created on demand and removed when the last holder or waiter
/// lets go, so the map only grows with in-flight submissions.
#[derive(Debug, Default)]
pub struct SubmissionLeases {
    locks: Arc<LeaseMap>,
}

impl SubmissionLeases {
    /// Creates an empty lease table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive use of `submission_id`.
    ///
    /// Dropping the returned future while it waits gives up the place in
    /// line and releases the entry like a dropped lease would.
    pub async fn acquire(&self, submission_id: &str) -> SubmissionLease {
        let (ticket, lock) = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = locks.entry(submission_id.to_string()).or_default();
            slot.users += 1;
            let ticket = LeaseTicket {
                key: submission_id.to_string(),
                locks: Arc::clone(&self.locks),
            };
            (ticket, Arc::clone(&slot.lock))
        };
        let guard = lock.lock_owned().await;
        SubmissionLease {
            _guard: guard,
            _ticket: ticket,
        }
    }

    /// Number of submissions with a live lease or waiter.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive use of one submission, released on drop.
#[derive(Debug)]
pub struct SubmissionLease {
    // Field order matters: the async lock is released before the entry.
    _guard: OwnedMutexGuard<()>,
    _ticket: LeaseTicket,
}

/// One registered user of a lease entry.
#[derive(Debug)]
struct LeaseTicket {
    key: String,
    locks: Arc<LeaseMap>,
}

impl Drop for LeaseTicket {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = locks.get_mut(&self.key) else {
            return;
        };
        slot.users = slot.users.saturating_sub(1);
        if slot.users == 0 {
            locks.remove(&self.key);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use rubric_grading::{Improvement, Scores};

    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn lookup_returns_latest() {
        let store = Arc::new(MemoryStore::new());
        let cache = ResultCache::new(store.clone());
        assert!(cache.lookup("s1").await.unwrap().is_none());

        let scores = Scores::from_dimensions([6.0; 10], 6.0);
        let first = AnalysisResult::new("s1", scores, Improvement::default());
        let second = AnalysisResult::new("s1", scores, Improvement::default());
        store.insert_analysis(&first).await.unwrap();
        store.insert_analysis(&second).await.unwrap();

        let hit = cache.lookup("s1").await.unwrap().unwrap();
        assert_eq!(hit.id, second.id);
    }

    #[tokio::test]
    async fn lease_is_exclusive_per_submission() {
        let leases = Arc::new(SubmissionLeases::new());
        let held = leases.acquire("s1").await;

        let contender = {
            let leases = Arc::clone(&leases);
            tokio::spawn(async move {
                let _lease = leases.acquire("s1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // A different submission is not blocked.
        let other = leases.acquire("s2").await;
        drop(other);

        drop(held);
        contender.await.unwrap();
        assert_eq!(leases.in_flight(), 0);
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_leak_entry() {
        let leases = Arc::new(SubmissionLeases::new());
        let held = leases.acquire("s1").await;

        let waiter = {
            let leases = Arc::clone(&leases);
            tokio::spawn(async move {
                let _lease = leases.acquire("s1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(leases.in_flight(), 1);

        // Cancelled while still waiting, the way a disconnected request is.
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert_eq!(leases.in_flight(), 0);

        // The submission can be leased again afterwards.
        drop(leases.acquire("s1").await);
        assert_eq!(leases.in_flight(), 0);
    }

    #[tokio::test]
    async fn lease_entry_removed_after_release() {
        let leases = SubmissionLeases::new();
        {
            let _lease = leases.acquire("s1").await;
            assert_eq!(leases.in_flight(), 1);
        }
        assert_eq!(leases.in_flight(), 0);
    }
}
