//! The grading invoker: prompt, call, validate.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::client::{CompletionClient, CompletionRequest};
use crate::error::{GradingError, Result, UpstreamKind};
use crate::prompt::{build_prompt, SYSTEM_PROMPT};
use crate::schema::{parse_output, response_schema, SchemaVariant};
use crate::types::{AnalysisResult, ExerciseBrief};

/// Default timeout for one completion call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(45);

/// Grades submissions through a [`CompletionClient`].
///
/// Each call to [`GradingInvoker::grade`] makes exactly one completion call.
/// Failures are never retried.
#[derive(Clone)]
pub struct GradingInvoker {
    client: Arc<dyn CompletionClient>,
    variant: SchemaVariant,
    timeout: Duration,
    temperature: f32,
}

impl std::fmt::Debug for GradingInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GradingInvoker")
            .field("client", &self.client.name())
            .field("variant", &self.variant)
            .field("timeout", &self.timeout)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl GradingInvoker {
    /// Creates an invoker with the default timeout and schema variant.
    #[must_use]
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            variant: SchemaVariant::default(),
            timeout: DEFAULT_TIMEOUT,
            temperature: 0.2,
        }
    }

    /// Sets the schema variant requested from the service.
    #[must_use]
    pub const fn with_variant(mut self, variant: SchemaVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Sets the completion timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Grades `response` against `brief` and returns a validated result for
    /// `submission_id`.
    ///
    /// # Errors
    ///
    /// - [`GradingError::Upstream`] if the service fails or the timeout expires.
    /// - [`GradingError::SchemaValidation`] if the output does not fit the schema.
    #[instrument(skip(self, brief, response), fields(brief_id = %brief.id))]
    pub async fn grade(
        &self,
        submission_id: &str,
        brief: &ExerciseBrief,
        response: &str,
    ) -> Result<AnalysisResult> {
        let request = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(brief, response, self.variant),
            schema_name: self.variant.schema_name().to_string(),
            schema: response_schema(self.variant),
            temperature: self.temperature,
        };

        debug!(client = self.client.name(), variant = ?self.variant, "invoking completion service");

        let output = tokio::time::timeout(self.timeout, self.client.complete(&request))
            .await
            .map_err(|_| {
                warn!(timeout_secs = self.timeout.as_secs(), "completion call timed out");
                GradingError::upstream(
                    UpstreamKind::Timeout,
                    format!("no answer after {}s", self.timeout.as_secs()),
                )
            })??;

        let (scores, improvement) = parse_output(&output).map_err(|e| {
            warn!(error = %e, "completion output rejected");
            e
        })?;

        let result = AnalysisResult::new(submission_id, scores, improvement);
        info!(
            analysis_id = %result.id,
            overall_score = result.scores.overall_score,
            "submission graded"
        );
        Ok(result)
    }
}
