//! Rubric grading
//!
//! Builds rubric prompts, calls the completion service and validates its
//! structured output into a canonical [`AnalysisResult`].

pub mod client;
pub mod error;
pub mod invoker;
pub mod markup;
pub mod prompt;
pub mod schema;
pub mod types;

pub use client::{ClientConfig, CompletionClient, CompletionRequest, OpenAiCompatClient};
pub use error::{GradingError, Result, UpstreamKind};
pub use invoker::{GradingInvoker, DEFAULT_TIMEOUT};
pub use markup::{sanitize_markup, ALLOWED_TAGS};
pub use prompt::{build_prompt, SYSTEM_PROMPT};
pub use schema::{parse_output, response_schema, SchemaVariant, ScoreSheet, MAX_SCORE, MIN_SCORE};
pub use types::{
    mean_score, AnalysisResult, Dimension, ExerciseBrief, Improvement, Scores, Tip,
};
