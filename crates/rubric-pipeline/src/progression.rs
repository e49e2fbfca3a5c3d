//! Experience points and levels.
//!
//! A graded score becomes XP for the submission's owner, and the owner's
//! level is recomputed from the [`LevelTable`]. Levels are only ever raised
//! in the store, so two awards racing for one user cannot lower a level.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, RubricError};
use crate::store::Datastore;

/// Default level below which every award is the maximum.
pub const DEFAULT_ACCELERATED_BELOW_LEVEL: u32 = 6;

/// XP granted to users below the accelerated level.
pub const ACCELERATED_XP: u64 = 10;

/// One row of the level table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelThreshold {
    /// Level reached at this threshold.
    pub level: u32,
    /// Minimum total XP for the level.
    pub xp_threshold: u64,
}

impl LevelThreshold {
    /// Creates a table row.
    #[must_use]
    pub const fn new(level: u32, xp_threshold: u64) -> Self {
        Self {
            level,
            xp_threshold,
        }
    }
}

/// Default thresholds for levels 1 through 10.
#[must_use]
pub fn default_levels() -> Vec<LevelThreshold> {
    [
        (1, 0),
        (2, 50),
        (3, 120),
        (4, 210),
        (5, 320),
        (6, 450),
        (7, 600),
        (8, 780),
        (9, 1000),
        (10, 1250),
    ]
    .into_iter()
    .map(|(level, xp)| LevelThreshold::new(level, xp))
    .collect()
}

/// Validated level table, ascending by threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelTable {
    entries: Vec<LevelThreshold>,
}

impl Default for LevelTable {
    fn default() -> Self {
        Self {
            entries: default_levels(),
        }
    }
}

impl LevelTable {
    /// Builds a table, rejecting empty or unsorted input.
    ///
    /// Thresholds and levels must both be strictly ascending.
    ///
    /// # Errors
    ///
    /// Returns [`RubricError::ConfigValidationError`] describing the first
    /// offending row.
    pub fn new(entries: Vec<LevelThreshold>) -> Result<Self> {
        if entries.is_empty() {
            return Err(RubricError::config_validation(
                "progression.levels must not be empty",
                "Provide at least one level, e.g. [{\"level\": 1, \"xpThreshold\": 0}]",
            ));
        }
        for pair in entries.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            if next.xp_threshold <= prev.xp_threshold || next.level <= prev.level {
                return Err(RubricError::config_validation(
                    format!(
                        "progression.levels must be ascending: level {} ({} XP) follows level {} ({} XP)",
                        next.level, next.xp_threshold, prev.level, prev.xp_threshold
                    ),
                    "Order the level table by xpThreshold with increasing levels",
                ));
            }
        }
        Ok(Self { entries })
    }

    /// Level for a total XP value; at least 1.
    #[must_use]
    pub fn level_for(&self, total_xp: u64) -> u32 {
        let mut level = 1;
        for entry in &self.entries {
            if entry.xp_threshold > total_xp {
                break;
            }
            level = entry.level;
        }
        level.max(1)
    }

    /// Table rows in ascending order.
    #[must_use]
    pub fn entries(&self) -> &[LevelThreshold] {
        &self.entries
    }
}

/// Effect of one award.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// XP added by this award.
    pub granted: u64,
    /// Total XP after the award.
    pub new_xp: u64,
    /// Level after the award.
    pub new_level: u32,
}

/// Converts graded scores into XP and levels.
#[derive(Clone)]
pub struct ProgressionEngine {
    store: Arc<dyn Datastore>,
    table: LevelTable,
    accelerated_below_level: u32,
}

impl ProgressionEngine {
    /// Creates an engine with the default acceleration threshold.
    #[must_use]
    pub fn new(store: Arc<dyn Datastore>, table: LevelTable) -> Self {
        Self {
            store,
            table,
            accelerated_below_level: DEFAULT_ACCELERATED_BELOW_LEVEL,
        }
    }

    /// Sets the level below which every award is [`ACCELERATED_XP`].
    #[must_use]
    pub const fn with_accelerated_below_level(mut self, level: u32) -> Self {
        self.accelerated_below_level = level;
        self
    }

    /// The level table in use.
    #[must_use]
    pub const fn table(&self) -> &LevelTable {
        &self.table
    }

    /// XP for a score earned at `level`, or `None` for a score outside `(0, 10]`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn xp_for(&self, level: u32, score: f64) -> Option<u64> {
        if !score.is_finite() || score <= 0.0 || score > 10.0 {
            return None;
        }
        if level < self.accelerated_below_level {
            return Some(ACCELERATED_XP);
        }
        // In range (0, 10], so the rounded value fits.
        Some(score.round() as u64)
    }

    /// Awards XP for `score` to `user_id` and raises their level if earned.
    ///
    /// Returns `None` without touching the store when the score is out of range.
    ///
    /// # Errors
    ///
    /// [`RubricError::NotFound`] for an unknown user, [`RubricError::Store`]
    /// if the datastore fails.
    pub async fn award(&self, user_id: &str, score: f64) -> Result<Option<Progress>> {
        let user = self
            .store
            .user(user_id)
            .await?
            .ok_or_else(|| RubricError::not_found("user", user_id))?;

        let Some(granted) = self.xp_for(user.level, score) else {
            warn!(user_id, score, "score outside (0, 10], no XP awarded");
            return Ok(None);
        };

        let new_xp = self
            .store
            .add_xp(user_id, granted)
            .await?
            .ok_or_else(|| RubricError::not_found("user", user_id))?;
        let target = self.table.level_for(new_xp);
        let new_level = self
            .store
            .raise_level(user_id, target)
            .await?
            .ok_or_else(|| RubricError::not_found("user", user_id))?;

        if new_level > user.level {
            info!(user_id, from = user.level, to = new_level, "level up");
        }
        debug!(user_id, granted, new_xp, new_level, "xp awarded");

        Ok(Some(Progress {
            granted,
            new_xp,
            new_level,
        }))
    }
}
