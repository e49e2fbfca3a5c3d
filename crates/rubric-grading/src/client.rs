//! Completion service client.
//!
//! [`CompletionClient`] is the seam to the external text-generation service.
//! [`OpenAiCompatClient`] talks to any endpoint that accepts the OpenAI chat
//! completion format with a `json_schema` response format.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{GradingError, Result, UpstreamKind};

/// A request for schema-constrained output.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// System instruction.
    pub system: String,
    /// User prompt.
    pub prompt: String,
    /// Name of the output schema.
    pub schema_name: String,
    /// JSON schema the output must conform to.
    pub schema: Value,
    /// Sampling temperature.
    pub temperature: f32,
}

/// A service that turns a prompt and a schema into structured text.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Returns the client name used in logs.
    fn name(&self) -> &str;

    /// Runs the completion and returns the raw output text.
    ///
    /// # Errors
    ///
    /// Returns [`GradingError::Upstream`] for transport or service failures.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Connection settings for [`OpenAiCompatClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Bearer key; `None` sends no `Authorization` header.
    pub api_key: Option<String>,
}

/// Completion client for OpenAI-compatible chat completion endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    config: ClientConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatClient {
    /// Creates a new client.
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(GradingError::NotConfigured("base URL is empty".into()));
        }
        if config.model.trim().is_empty() {
            return Err(GradingError::NotConfigured("model is empty".into()));
        }
        Ok(Self {
            config,
            http: reqwest::Client::new(),
        })
    }

    /// Returns the client configuration.
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        json!({
            "model": self.config.model,
            "temperature": request.temperature,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "strict": true,
                    "schema": request.schema,
                },
            },
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = self.completions_url();
        debug!(model = %self.config.model, prompt_len = request.prompt.len(), "sending completion request");

        let mut req = self.http.post(&url).json(&self.request_body(request));
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let kind = match status.as_u16() {
                401 | 403 => UpstreamKind::Authentication,
                429 => UpstreamKind::RateLimit,
                500..=599 => UpstreamKind::Server,
                _ => UpstreamKind::Other,
            };
            warn!(status = status.as_u16(), %kind, "completion service returned an error");
            return Err(GradingError::upstream(kind, format!("HTTP {status}: {body}")));
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            GradingError::upstream(
                UpstreamKind::InvalidResponse,
                format!("failed to parse chat completion: {e}"),
            )
        })?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                GradingError::upstream(UpstreamKind::InvalidResponse, "completion has no content")
            })?;

        debug!(output_len = content.len(), "completion received");
        Ok(content)
    }
}
