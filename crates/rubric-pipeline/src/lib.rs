//! Rubric pipeline
//!
//! Credit-gated, idempotent grading: admission control, result cache,
//! grading invocation, XP progression, and the HTTP API in front of them.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod progression;
pub mod rate_limit;
pub mod store;

#[cfg(test)]
mod test_support;

pub use api::{client_key, create_router, AnalyzeRequest, AppState, ErrorResponse, HealthResponse};
pub use auth::{bearer_token, StaticTokenVerifier, TokenVerifier};
pub use cache::{ResultCache, SubmissionLease, SubmissionLeases};
pub use config::{
    AuthConfig, Config, DatabaseConfig, GradingConfig, ProgressionConfig, RateLimitConfig,
    ServerConfig,
};
pub use error::{Result, RubricError};
pub use ledger::{CreditLedger, DebitReceipt};
pub use pipeline::{AnalysisOutcome, GradingRequest, Pipeline, PipelineStage};
pub use progression::{
    default_levels, LevelTable, LevelThreshold, Progress, ProgressionEngine, ACCELERATED_XP,
    DEFAULT_ACCELERATED_BELOW_LEVEL,
};
pub use rate_limit::{RateLimiter, SlidingWindowLimiter, DEFAULT_CAPACITY, DEFAULT_WINDOW};
pub use store::{
    Datastore, DebitOutcome, MemoryStore, SqliteStore, StoreError, StoreResult, Submission,
    UserAccount,
};
