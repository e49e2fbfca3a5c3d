//! SQLite-backed datastore.
//!
//! Conditional updates are single statements (`UPDATE ... WHERE ... RETURNING`),
//! so SQLite itself arbitrates concurrent debits and XP claims. Every query
//! runs on Tokio's blocking pool; the async methods only await its result.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rubric_grading::{AnalysisResult, ExerciseBrief, Improvement, Scores};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::{Datastore, DebitOutcome, StoreError, StoreResult, Submission, UserAccount};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id        TEXT PRIMARY KEY,
    credits   INTEGER NOT NULL DEFAULT 0 CHECK (credits >= 0),
    total_xp  INTEGER NOT NULL DEFAULT 0 CHECK (total_xp >= 0),
    level     INTEGER NOT NULL DEFAULT 1 CHECK (level >= 1)
);

CREATE TABLE IF NOT EXISTS exercise_briefs (
    id          TEXT PRIMARY KEY,
    task        TEXT NOT NULL,
    niche       TEXT NOT NULL,
    title       TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    needs       TEXT NOT NULL DEFAULT '',
    details     TEXT NOT NULL DEFAULT '',
    notes       TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS submissions (
    id          TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL REFERENCES users(id),
    brief_id    TEXT NOT NULL REFERENCES exercise_briefs(id),
    response    TEXT NOT NULL DEFAULT '',
    grade       REAL,
    xp_awarded  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS analysis_results (
    id             TEXT PRIMARY KEY,
    submission_id  TEXT NOT NULL REFERENCES submissions(id),
    scores         TEXT NOT NULL,
    improvement    TEXT NOT NULL,
    created_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_analysis_results_submission
    ON analysis_results (submission_id);
";

/// Datastore backed by a single SQLite connection.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and ensures the schema exists.
    ///
    /// The special path `:memory:` opens a private in-memory database.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = if path == Path::new(":memory:") {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        debug!(path = %path.display(), "opened sqlite datastore");
        Self::from_connection(conn)
    }

    /// Opens a private in-memory database with the schema applied.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn)
        })
        .await?
    }
}

fn to_u32(table: &'static str, column: &str, value: i64) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt {
        table,
        message: format!("{column} out of range: {value}"),
    })
}

fn to_u64(table: &'static str, column: &str, value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt {
        table,
        message: format!("{column} out of range: {value}"),
    })
}

fn to_i64(value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::Corrupt {
        table: "users",
        message: format!("value too large for storage: {value}"),
    })
}

fn brief_from_row(row: &Row<'_>) -> rusqlite::Result<ExerciseBrief> {
    Ok(ExerciseBrief {
        id: row.get(0)?,
        task: row.get(1)?,
        niche: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        needs: row.get(5)?,
        details: row.get(6)?,
        notes: row.get(7)?,
    })
}

fn submission_from_row(row: &Row<'_>) -> rusqlite::Result<Submission> {
    Ok(Submission {
        id: row.get(0)?,
        user_id: row.get(1)?,
        brief_id: row.get(2)?,
        response: row.get(3)?,
        grade: row.get(4)?,
        xp_awarded: row.get::<_, i64>(5)? != 0,
    })
}

fn map_duplicate(err: rusqlite::Error, entity: &'static str, id: &str) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            StoreError::Duplicate {
                entity,
                id: id.to_string(),
            }
        }
        other => StoreError::Sqlite(other),
    }
}

#[async_trait]
impl Datastore for SqliteStore {
    async fn user(&self, user_id: &str) -> StoreResult<Option<UserAccount>> {
        let user_id = user_id.to_string();
        let row = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, credits, total_xp, level FROM users WHERE id = ?1",
                        params![user_id],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, i64>(1)?,
                                row.get::<_, i64>(2)?,
                                row.get::<_, i64>(3)?,
                            ))
                        },
                    )
                    .optional()?)
            })
            .await?;

        row.map(|(id, credits, total_xp, level)| {
            Ok(UserAccount {
                id,
                credits: to_u32("users", "credits", credits)?,
                total_xp: to_u64("users", "total_xp", total_xp)?,
                level: to_u32("users", "level", level)?,
            })
        })
        .transpose()
    }

    async fn submission(&self, submission_id: &str) -> StoreResult<Option<Submission>> {
        let submission_id = submission_id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, user_id, brief_id, response, grade, xp_awarded
                     FROM submissions WHERE id = ?1",
                    params![submission_id],
                    submission_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn brief(&self, brief_id: &str) -> StoreResult<Option<ExerciseBrief>> {
        let brief_id = brief_id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, task, niche, title, description, needs, details, notes
                     FROM exercise_briefs WHERE id = ?1",
                    params![brief_id],
                    brief_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn debit_credit(&self, user_id: &str) -> StoreResult<DebitOutcome> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let remaining: Option<i64> = conn
                .query_row(
                    "UPDATE users SET credits = credits - 1
                     WHERE id = ?1 AND credits >= 1
                     RETURNING credits",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(remaining) = remaining {
                return Ok(DebitOutcome::Debited {
                    remaining: to_u32("users", "credits", remaining)?,
                });
            }

            let exists = conn
                .query_row("SELECT 1 FROM users WHERE id = ?1", params![user_id], |_| {
                    Ok(())
                })
                .optional()?
                .is_some();
            Ok(if exists {
                DebitOutcome::Insufficient
            } else {
                DebitOutcome::UnknownUser
            })
        })
        .await
    }

    async fn latest_analysis(&self, submission_id: &str) -> StoreResult<Option<AnalysisResult>> {
        let submission_id = submission_id.to_string();
        let row = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, submission_id, scores, improvement, created_at
                         FROM analysis_results WHERE submission_id = ?1
                         ORDER BY rowid DESC LIMIT 1",
                        params![submission_id],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, String>(3)?,
                                row.get::<_, String>(4)?,
                            ))
                        },
                    )
                    .optional()?)
            })
            .await?;

        let Some((id, submission_id, scores, improvement, created_at)) = row else {
            return Ok(None);
        };

        let scores: Scores = serde_json::from_str(&scores)?;
        let improvement: Improvement = serde_json::from_str(&improvement)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| StoreError::Corrupt {
                table: "analysis_results",
                message: format!("created_at: {e}"),
            })?
            .with_timezone(&Utc);

        Ok(Some(AnalysisResult {
            id,
            submission_id,
            scores,
            improvement,
            created_at,
        }))
    }

    async fn insert_analysis(&self, result: &AnalysisResult) -> StoreResult<()> {
        let scores = serde_json::to_string(&result.scores)?;
        let improvement = serde_json::to_string(&result.improvement)?;
        let id = result.id.clone();
        let submission_id = result.submission_id.clone();
        let created_at = result.created_at.to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO analysis_results (id, submission_id, scores, improvement, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, submission_id, scores, improvement, created_at],
            )
            .map_err(|e| map_duplicate(e, "analysis result", &id))?;
            Ok(())
        })
        .await
    }

    async fn set_grade(&self, submission_id: &str, grade: f64) -> StoreResult<()> {
        let submission_id = submission_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE submissions SET grade = ?2 WHERE id = ?1",
                params![submission_id, grade],
            )?;
            Ok(())
        })
        .await
    }

    async fn claim_xp_award(&self, submission_id: &str) -> StoreResult<bool> {
        let submission_id = submission_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE submissions SET xp_awarded = 1 WHERE id = ?1 AND xp_awarded = 0",
                params![submission_id],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn add_xp(&self, user_id: &str, xp: u64) -> StoreResult<Option<u64>> {
        let user_id = user_id.to_string();
        let xp = to_i64(xp)?;
        let total: Option<i64> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "UPDATE users SET total_xp = total_xp + ?2 WHERE id = ?1 RETURNING total_xp",
                        params![user_id, xp],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        total.map(|t| to_u64("users", "total_xp", t)).transpose()
    }

    async fn raise_level(&self, user_id: &str, level: u32) -> StoreResult<Option<u32>> {
        let user_id = user_id.to_string();
        let level: Option<i64> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "UPDATE users SET level = MAX(level, ?2) WHERE id = ?1 RETURNING level",
                        params![user_id, i64::from(level)],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        level.map(|l| to_u32("users", "level", l)).transpose()
    }

    async fn insert_user(&self, user: &UserAccount) -> StoreResult<()> {
        let id = user.id.clone();
        let credits = i64::from(user.credits);
        let total_xp = to_i64(user.total_xp)?;
        let level = i64::from(user.level.max(1));
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (id, credits, total_xp, level) VALUES (?1, ?2, ?3, ?4)",
                params![id, credits, total_xp, level],
            )
            .map_err(|e| map_duplicate(e, "user", &id))?;
            Ok(())
        })
        .await
    }

    async fn insert_brief(&self, brief: &ExerciseBrief) -> StoreResult<()> {
        let brief = brief.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO exercise_briefs
                 (id, task, niche, title, description, needs, details, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    brief.id,
                    brief.task,
                    brief.niche,
                    brief.title,
                    brief.description,
                    brief.needs,
                    brief.details,
                    brief.notes
                ],
            )
            .map_err(|e| map_duplicate(e, "exercise brief", &brief.id))?;
            Ok(())
        })
        .await
    }

    async fn insert_submission(&self, submission: &Submission) -> StoreResult<()> {
        let submission = submission.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO submissions (id, user_id, brief_id, response, grade, xp_awarded)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    submission.id,
                    submission.user_id,
                    submission.brief_id,
                    submission.response,
                    submission.grade,
                    i64::from(submission.xp_awarded)
                ],
            )
            .map_err(|e| map_duplicate(e, "submission", &submission.id))?;
            Ok(())
        })
        .await
    }
}
