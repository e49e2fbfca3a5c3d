//! In-process datastore.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rubric_grading::{AnalysisResult, ExerciseBrief};

use super::{Datastore, DebitOutcome, StoreError, StoreResult, Submission, UserAccount};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<String, UserAccount>,
    briefs: HashMap<String, ExerciseBrief>,
    submissions: HashMap<String, Submission>,
    analyses: HashMap<String, Vec<AnalysisResult>>,
}

/// Datastore held entirely in memory behind one mutex.
///
/// Every operation runs under the lock, which makes each conditional update
/// atomic. Contents are lost when the store is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of analysis records stored for a submission.
    #[must_use]
    pub fn analysis_count(&self, submission_id: &str) -> usize {
        self.tables()
            .analyses
            .get(submission_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn user(&self, user_id: &str) -> StoreResult<Option<UserAccount>> {
        Ok(self.tables().users.get(user_id).cloned())
    }

    async fn submission(&self, submission_id: &str) -> StoreResult<Option<Submission>> {
        Ok(self.tables().submissions.get(submission_id).cloned())
    }

    async fn brief(&self, brief_id: &str) -> StoreResult<Option<ExerciseBrief>> {
        Ok(self.tables().briefs.get(brief_id).cloned())
    }

    async fn debit_credit(&self, user_id: &str) -> StoreResult<DebitOutcome> {
        let mut tables = self.tables();
        let Some(user) = tables.users.get_mut(user_id) else {
            return Ok(DebitOutcome::UnknownUser);
        };
        if user.credits < 1 {
            return Ok(DebitOutcome::Insufficient);
        }
        user.credits -= 1;
        Ok(DebitOutcome::Debited {
            remaining: user.credits,
        })
    }

    async fn latest_analysis(&self, submission_id: &str) -> StoreResult<Option<AnalysisResult>> {
        Ok(self
            .tables()
            .analyses
            .get(submission_id)
            .and_then(|records| records.last().cloned()))
    }

    async fn insert_analysis(&self, result: &AnalysisResult) -> StoreResult<()> {
        self.tables()
            .analyses
            .entry(result.submission_id.clone())
            .or_default()
            .push(result.clone());
        Ok(())
    }

    async fn set_grade(&self, submission_id: &str, grade: f64) -> StoreResult<()> {
        if let Some(submission) = self.tables().submissions.get_mut(submission_id) {
            submission.grade = Some(grade);
        }
        Ok(())
    }

    async fn claim_xp_award(&self, submission_id: &str) -> StoreResult<bool> {
        let mut tables = self.tables();
        match tables.submissions.get_mut(submission_id) {
            Some(submission) if !submission.xp_awarded => {
                submission.xp_awarded = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn add_xp(&self, user_id: &str, xp: u64) -> StoreResult<Option<u64>> {
        Ok(self.tables().users.get_mut(user_id).map(|user| {
            user.total_xp = user.total_xp.saturating_add(xp);
            user.total_xp
        }))
    }

    async fn raise_level(&self, user_id: &str, level: u32) -> StoreResult<Option<u32>> {
        Ok(self.tables().users.get_mut(user_id).map(|user| {
            user.level = user.level.max(level);
            user.level
        }))
    }

    async fn insert_user(&self, user: &UserAccount) -> StoreResult<()> {
        let mut tables = self.tables();
        if tables.users.contains_key(&user.id) {
            return Err(StoreError::Duplicate {
                entity: "user",
                id: user.id.clone(),
            });
        }
        tables.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn insert_brief(&self, brief: &ExerciseBrief) -> StoreResult<()> {
        let mut tables = self.tables();
        if tables.briefs.contains_key(&brief.id) {
            return Err(StoreError::Duplicate {
                entity: "exercise brief",
                id: brief.id.clone(),
            });
        }
        tables.briefs.insert(brief.id.clone(), brief.clone());
        Ok(())
    }

    async fn insert_submission(&self, submission: &Submission) -> StoreResult<()> {
        let mut tables = self.tables();
        if tables.submissions.contains_key(&submission.id) {
            return Err(StoreError::Duplicate {
                entity: "submission",
                id: submission.id.clone(),
            });
        }
        tables
            .submissions
            .insert(submission.id.clone(), submission.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn submission(id: &str) -> Submission {
        Submission {
            id: id.into(),
            user_id: "u1".into(),
            brief_id: "b1".into(),
            response: "copy".into(),
            grade: None,
            xp_awarded: false,
        }
    }

    #[tokio::test]
    async fn debit_stops_at_zero() {
        let store = MemoryStore::new();
        store.insert_user(&UserAccount::new("u1", 1)).await.unwrap();

        assert_eq!(
            store.debit_credit("u1").await.unwrap(),
            DebitOutcome::Debited { remaining: 0 }
        );
        assert_eq!(
            store.debit_credit("u1").await.unwrap(),
            DebitOutcome::Insufficient
        );
        assert_eq!(store.user("u1").await.unwrap().unwrap().credits, 0);
        assert_eq!(
            store.debit_credit("ghost").await.unwrap(),
            DebitOutcome::UnknownUser
        );
    }

    #[tokio::test]
    async fn concurrent_debits_with_one_credit() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(&UserAccount::new("u1", 1)).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.debit_credit("u1").await.unwrap() })
            })
            .collect();

        let mut debited = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), DebitOutcome::Debited { .. }) {
                debited += 1;
            }
        }
        assert_eq!(debited, 1);
    }

    #[tokio::test]
    async fn claim_xp_award_only_once() {
        let store = MemoryStore::new();
        store.insert_submission(&submission("s1")).await.unwrap();

        assert!(store.claim_xp_award("s1").await.unwrap());
        assert!(!store.claim_xp_award("s1").await.unwrap());
        assert!(!store.claim_xp_award("missing").await.unwrap());
    }

    #[tokio::test]
    async fn raise_level_never_lowers() {
        let store = MemoryStore::new();
        store.insert_user(&UserAccount::new("u1", 0)).await.unwrap();

        assert_eq!(store.raise_level("u1", 4).await.unwrap(), Some(4));
        assert_eq!(store.raise_level("u1", 2).await.unwrap(), Some(4));
        assert_eq!(store.raise_level("ghost", 2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = MemoryStore::new();
        store.insert_user(&UserAccount::new("u1", 0)).await.unwrap();
        let err = store
            .insert_user(&UserAccount::new("u1", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { entity: "user", .. }));
    }
}
