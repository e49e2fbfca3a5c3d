//! Fixtures shared by the pipeline and router tests.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rubric_grading::{CompletionClient, CompletionRequest, ExerciseBrief, GradingError};
use serde_json::json;

use crate::store::{Datastore, MemoryStore, Submission, UserAccount};
use crate::Config;

pub const TOKEN: &str = "token-u1";
pub const OTHER_TOKEN: &str = "token-u2";

/// Completion client that answers every call with a fixed output.
pub struct ScriptedClient {
    output: std::result::Result<String, fn() -> GradingError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: Ok(output.into()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: fn() -> GradingError) -> Self {
        Self {
            output: Err(error),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: &CompletionRequest) -> rubric_grading::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        match &self.output {
            Ok(output) => Ok(output.clone()),
            Err(make) => Err(make()),
        }
    }
}

/// Valid supplied-shape output with an aggregate of 7.5.
pub fn valid_output() -> String {
    json!({
        "scores": {
            "clarity": 7, "audienceRelevance": 8, "persuasiveness": 6,
            "structure": 9, "grammar": 7, "tone": 8, "attentionGrabbing": 6,
            "consistency": 9, "emotionalAppeal": 7, "callToAction": 8,
            "overallScore": 7.5
        },
        "improvement": {
            "tips": [{"title": "Hook", "advice": "Lead with the benefit."}],
            "rewrittenVersion": "<p>Sharper copy</p><script>x</script>"
        }
    })
    .to_string()
}

/// Config with development tokens for `u1` and `u2`.
pub fn config() -> Config {
    let mut config = Config::default();
    config.auth.tokens.insert(TOKEN.into(), "u1".into());
    config.auth.tokens.insert(OTHER_TOKEN.into(), "u2".into());
    config.database.path = ":memory:".into();
    config
}

/// Store with users `u1` (given credits, level 1) and `u2`, brief `b1`,
/// and submission `s1` owned by `u1`.
pub async fn seeded_store(credits: u32) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert_user(&UserAccount::new("u1", credits)).await.unwrap();
    store.insert_user(&UserAccount::new("u2", 5)).await.unwrap();
    store
        .insert_brief(&ExerciseBrief {
            id: "b1".into(),
            task: "email".into(),
            niche: "fitness".into(),
            title: "Win back lapsed members".into(),
            ..ExerciseBrief::default()
        })
        .await
        .unwrap();
    store
        .insert_submission(&Submission {
            id: "s1".into(),
            user_id: "u1".into(),
            brief_id: "b1".into(),
            response: "Come back and get your first month free.".into(),
            grade: None,
            xp_awarded: false,
        })
        .await
        .unwrap();
    store
}
