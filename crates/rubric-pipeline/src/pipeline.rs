//! The grading pipeline.
//!
//! One [`Pipeline::analyze`] call takes a request through admission control
//! (authentication, rate limit, ownership, credit debit), the result cache,
//! the grading invoker, persistence and progression. Any stage error aborts
//! the request; effects already committed (a spent credit, a stored result)
//! are kept and nothing is retried.

use std::fmt;
use std::sync::Arc;

use rubric_grading::{AnalysisResult, CompletionClient, GradingInvoker};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::auth::{StaticTokenVerifier, TokenVerifier};
use crate::cache::{ResultCache, SubmissionLeases};
use crate::config::Config;
use crate::error::{Result, RubricError};
use crate::ledger::CreditLedger;
use crate::progression::{Progress, ProgressionEngine};
use crate::rate_limit::{RateLimiter, SlidingWindowLimiter};
use crate::store::{Datastore, Submission};

/// Stages a grading request passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Resolving the bearer token.
    Authenticating,
    /// The client is within its request window.
    RateChecked,
    /// Submission and brief loaded and owned by the caller.
    Loaded,
    /// One credit was taken.
    Debited,
    /// A previous analysis answered the request.
    CacheHit,
    /// Waiting on the completion service.
    Grading,
    /// The completion output passed validation.
    Validated,
    /// The analysis was stored.
    Persisted,
    /// XP and level were updated (or already had been).
    Progressed,
    /// The result is on its way back.
    Responded,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Authenticating => "authenticating",
            Self::RateChecked => "rate_checked",
            Self::Loaded => "loaded",
            Self::Debited => "debited",
            Self::CacheHit => "cache_hit",
            Self::Grading => "grading",
            Self::Validated => "validated",
            Self::Persisted => "persisted",
            Self::Progressed => "progressed",
            Self::Responded => "responded",
        };
        write!(f, "{s}")
    }
}

/// One incoming grading request.
#[derive(Debug, Clone)]
pub struct GradingRequest {
    /// Bearer token, if the caller sent one.
    pub token: Option<String>,
    /// Client network identity for rate limiting.
    pub client_key: String,
    /// Submission to grade.
    pub submission_id: String,
}

/// What [`Pipeline::analyze`] produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutcome {
    /// The analysis returned to the caller.
    pub result: AnalysisResult,
    /// Whether the analysis came from the cache.
    pub cached: bool,
    /// XP and level change, if progression ran for this request.
    pub progress: Option<Progress>,
    /// Credits left after the debit.
    pub remaining_credits: u32,
}

/// Sequences admission control, caching, grading and progression.
pub struct Pipeline {
    store: Arc<dyn Datastore>,
    verifier: Arc<dyn TokenVerifier>,
    limiter: Arc<dyn RateLimiter>,
    ledger: CreditLedger,
    cache: ResultCache,
    invoker: GradingInvoker,
    progression: ProgressionEngine,
    leases: Option<SubmissionLeases>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("invoker", &self.invoker)
            .field("serialize_submissions", &self.leases.is_some())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Builds a pipeline from validated configuration.
    ///
    /// The rate limiter is an in-process sliding window and tokens are
    /// checked against `config.auth.tokens`; both can be replaced with
    /// [`Pipeline::with_rate_limiter`] and [`Pipeline::with_verifier`].
    ///
    /// # Errors
    ///
    /// Returns `RubricError::ConfigValidationError` if the configuration is invalid.
    pub fn new(
        config: &Config,
        store: Arc<dyn Datastore>,
        client: Arc<dyn CompletionClient>,
    ) -> Result<Self> {
        config.validate()?;

        let invoker = GradingInvoker::new(client)
            .with_variant(config.grading.schema_variant)
            .with_timeout(config.grading.timeout())
            .with_temperature(config.grading.temperature);
        let progression =
            ProgressionEngine::new(Arc::clone(&store), config.progression.level_table()?)
                .with_accelerated_below_level(config.progression.accelerated_below_level);

        Ok(Self {
            verifier: Arc::new(StaticTokenVerifier::new(config.auth.tokens.clone())),
            limiter: Arc::new(SlidingWindowLimiter::new(
                config.rate_limit.window(),
                config.rate_limit.max_requests,
            )),
            ledger: CreditLedger::new(Arc::clone(&store)),
            cache: ResultCache::new(Arc::clone(&store)),
            invoker,
            progression,
            leases: config.serialize_submissions.then(SubmissionLeases::new),
            store,
        })
    }

    /// Replaces the rate limiter.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Replaces the token verifier.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Runs one grading request end to end.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` for a missing or unknown token.
    /// - `RateLimited` when the client is over its window.
    /// - `NotFound` when the submission (or its brief) does not exist or
    ///   belongs to another user.
    /// - `EmptySubmission` when there is nothing to grade.
    /// - `InsufficientCredits` when the balance is below one.
    /// - `SchemaValidation` / `Upstream` from the grading call.
    /// - `Store` when the datastore fails.
    #[instrument(
        skip_all,
        fields(submission_id = %request.submission_id, client_key = %request.client_key)
    )]
    pub async fn analyze(&self, request: &GradingRequest) -> Result<AnalysisOutcome> {
        let submission_id = request.submission_id.as_str();

        stage(submission_id, PipelineStage::Authenticating);
        let user_id = self.authenticate(request.token.as_deref()).await?;

        if !self.limiter.admit(&request.client_key).await {
            return Err(RubricError::rate_limited(&request.client_key));
        }
        stage(submission_id, PipelineStage::RateChecked);

        let submission = self.load_submission(&user_id, submission_id).await?;
        let brief = self
            .store
            .brief(&submission.brief_id)
            .await?
            .ok_or_else(|| RubricError::not_found("exercise brief", &submission.brief_id))?;
        if submission.response.trim().is_empty() {
            return Err(RubricError::EmptySubmission {
                submission_id: submission.id.clone(),
            });
        }
        stage(submission_id, PipelineStage::Loaded);

        let receipt = self.ledger.check_and_debit(&user_id).await?;
        if !receipt.ok {
            return Err(RubricError::insufficient_credits(&user_id));
        }
        stage(submission_id, PipelineStage::Debited);

        // Held until the result is stored so a concurrent first request for
        // the same submission finds it in the cache.
        let _lease = match &self.leases {
            Some(leases) => Some(leases.acquire(submission_id).await),
            None => None,
        };

        if let Some(cached) = self.cache.lookup(submission_id).await? {
            stage(submission_id, PipelineStage::CacheHit);
            let progress = self.progress_once(&submission, cached.overall_score()).await?;
            stage(submission_id, PipelineStage::Responded);
            return Ok(AnalysisOutcome {
                result: cached,
                cached: true,
                progress,
                remaining_credits: receipt.remaining,
            });
        }

        stage(submission_id, PipelineStage::Grading);
        let result = self
            .invoker
            .grade(submission_id, &brief, &submission.response)
            .await?;
        stage(submission_id, PipelineStage::Validated);

        self.store.insert_analysis(&result).await?;
        self.store
            .set_grade(submission_id, result.overall_score())
            .await?;
        stage(submission_id, PipelineStage::Persisted);

        let progress = self.progress_once(&submission, result.overall_score()).await?;
        stage(submission_id, PipelineStage::Responded);

        Ok(AnalysisOutcome {
            result,
            cached: false,
            progress,
            remaining_credits: receipt.remaining,
        })
    }

    async fn authenticate(&self, token: Option<&str>) -> Result<String> {
        let token = token.ok_or_else(|| RubricError::unauthorized("missing bearer token"))?;
        self.verifier
            .verify(token)
            .await
            .ok_or_else(|| RubricError::unauthorized("unknown bearer token"))
    }

    /// Loads a submission, hiding other users' submissions as not found.
    async fn load_submission(&self, user_id: &str, submission_id: &str) -> Result<Submission> {
        match self.store.submission(submission_id).await? {
            Some(submission) if submission.user_id == user_id => Ok(submission),
            Some(_) => {
                debug!(submission_id, user_id, "submission owned by another user");
                Err(RubricError::not_found("submission", submission_id))
            }
            None => Err(RubricError::not_found("submission", submission_id)),
        }
    }

    /// Awards XP unless it was already awarded for this submission.
    async fn progress_once(&self, submission: &Submission, score: f64) -> Result<Option<Progress>> {
        if !self.store.claim_xp_award(&submission.id).await? {
            debug!(submission_id = %submission.id, "xp already awarded");
            return Ok(None);
        }
        let progress = self.progression.award(&submission.user_id, score).await?;
        stage(&submission.id, PipelineStage::Progressed);
        Ok(progress)
    }
}

fn stage(submission_id: &str, stage: PipelineStage) {
    debug!(submission_id, %stage, "pipeline stage");
}
