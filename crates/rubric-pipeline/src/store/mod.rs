//! Datastore seam.
//!
//! The pipeline treats its datastore as a key-addressable row store. Every
//! mutation the pipeline needs is exposed as one single-row operation that
//! the implementation must perform atomically; there is no read-then-write
//! pair anywhere in this interface.
//!
//! Two implementations ship with the crate: [`SqliteStore`] for deployments
//! and [`MemoryStore`] for tests and ephemeral runs.

mod memory;
mod sqlite;

use async_trait::async_trait;
use rubric_grading::{AnalysisResult, ExerciseBrief};
use serde::{Deserialize, Serialize};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A specialized `Result` type for datastore operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by datastore implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored JSON column could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value violates the data model.
    #[error("corrupt row in '{table}': {message}")]
    Corrupt {
        /// Table holding the bad row.
        table: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// An insert collided with an existing row.
    #[error("duplicate {entity} '{id}'")]
    Duplicate {
        /// Kind of row.
        entity: &'static str,
        /// Colliding identifier.
        id: String,
    },
    /// The blocking task running a query panicked or was cancelled.
    #[error("datastore worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

// ============================================================================
// Rows
// ============================================================================

/// A user's balance and progression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    /// Unique identifier.
    pub id: String,
    /// Prepaid grading credits; never negative.
    pub credits: u32,
    /// Cumulative experience points.
    pub total_xp: u64,
    /// Level derived from `total_xp`; at least 1.
    pub level: u32,
}

impl UserAccount {
    /// Creates a level-1 account with no XP.
    #[must_use]
    pub fn new(id: impl Into<String>, credits: u32) -> Self {
        Self {
            id: id.into(),
            credits,
            total_xp: 0,
            level: 1,
        }
    }
}

/// A user's response to an exercise brief.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    /// Unique identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Brief this submission responds to.
    pub brief_id: String,
    /// Raw submission text.
    #[serde(default)]
    pub response: String,
    /// Denormalized overall score of the latest analysis.
    #[serde(default)]
    pub grade: Option<f64>,
    /// Whether XP has already been awarded for this submission.
    #[serde(default)]
    pub xp_awarded: bool,
}

/// Result of a conditional credit debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// One credit was taken; `remaining` is the new balance.
    Debited {
        /// Balance after the debit.
        remaining: u32,
    },
    /// Balance was below one; nothing changed.
    Insufficient,
    /// No such user.
    UnknownUser,
}

// ============================================================================
// Datastore
// ============================================================================

/// Row store used by the pipeline.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Fetches a user account.
    async fn user(&self, user_id: &str) -> StoreResult<Option<UserAccount>>;

    /// Fetches a submission.
    async fn submission(&self, submission_id: &str) -> StoreResult<Option<Submission>>;

    /// Fetches an exercise brief.
    async fn brief(&self, brief_id: &str) -> StoreResult<Option<ExerciseBrief>>;

    /// Takes one credit if the balance is at least one, in a single atomic
    /// conditional update.
    async fn debit_credit(&self, user_id: &str) -> StoreResult<DebitOutcome>;

    /// Returns the most recent analysis for a submission.
    async fn latest_analysis(&self, submission_id: &str) -> StoreResult<Option<AnalysisResult>>;

    /// Appends an analysis record. Earlier records are kept.
    async fn insert_analysis(&self, result: &AnalysisResult) -> StoreResult<()>;

    /// Sets the denormalized grade on a submission.
    async fn set_grade(&self, submission_id: &str, grade: f64) -> StoreResult<()>;

    /// Atomically flips the submission's `xp_awarded` flag from false to true.
    ///
    /// Returns `true` if this call performed the flip.
    async fn claim_xp_award(&self, submission_id: &str) -> StoreResult<bool>;

    /// Atomically adds XP and returns the new total, or `None` for an unknown user.
    async fn add_xp(&self, user_id: &str, xp: u64) -> StoreResult<Option<u64>>;

    /// Raises the level to `level` if it is higher than the stored one and
    /// returns the resulting level, or `None` for an unknown user.
    async fn raise_level(&self, user_id: &str, level: u32) -> StoreResult<Option<u32>>;

    /// Inserts a user account.
    async fn insert_user(&self, user: &UserAccount) -> StoreResult<()>;

    /// Inserts an exercise brief.
    async fn insert_brief(&self, brief: &ExerciseBrief) -> StoreResult<()>;

    /// Inserts a submission.
    async fn insert_submission(&self, submission: &Submission) -> StoreResult<()>;
}
