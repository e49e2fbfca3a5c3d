//! Error types for the grading pipeline.
//!
//! [`RubricError`] is the taxonomy every pipeline stage reports in. Each
//! variant maps to one HTTP status and one short public message; the
//! diagnostic detail carried by the variant is logged, never returned.

use std::path::PathBuf;

use axum::http::StatusCode;
use rubric_grading::{GradingError, UpstreamKind};

use crate::store::StoreError;

/// A specialized `Result` type for pipeline operations.
pub type Result<T> = std::result::Result<T, RubricError>;

/// Errors that can occur while handling a grading request or starting up.
#[derive(Debug, thiserror::Error)]
pub enum RubricError {
    // ========================================================================
    // Admission
    // ========================================================================
    /// Missing, malformed or unknown bearer token.
    #[error("Unauthorized: {reason}")]
    Unauthorized {
        /// Why authentication failed.
        reason: String,
    },

    /// The user has no credit left.
    #[error("Insufficient credits for user '{user_id}'")]
    InsufficientCredits {
        /// The user whose balance is exhausted.
        user_id: String,
    },

    /// The client exceeded its request window.
    #[error("Rate limit exceeded for client '{client_key}'")]
    RateLimited {
        /// The client key that was rejected.
        client_key: String,
    },

    /// A referenced row does not exist (or is not visible to the caller).
    #[error("{entity} not found: '{id}'")]
    NotFound {
        /// Kind of row ("submission", "exercise brief", "user").
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// The submission has no response text to grade.
    #[error("Submission '{submission_id}' has no response to grade")]
    EmptySubmission {
        /// The empty submission.
        submission_id: String,
    },

    // ========================================================================
    // Grading
    // ========================================================================
    /// The completion output did not fit the result schema.
    #[error("Schema validation failed: {message}")]
    SchemaValidation {
        /// What was wrong with the output.
        message: String,
    },

    /// The completion service failed or timed out.
    #[error("Upstream error ({kind}): {message}")]
    Upstream {
        /// Category of the failure.
        kind: UpstreamKind,
        /// Detail from the transport or the service.
        message: String,
    },

    // ========================================================================
    // Datastore
    // ========================================================================
    /// The datastore failed.
    #[error("Datastore error: {0}")]
    Store(#[from] StoreError),

    // ========================================================================
    // Configuration
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your rubric.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },
}

impl From<GradingError> for RubricError {
    fn from(err: GradingError) -> Self {
        match err {
            GradingError::SchemaValidation { message } => Self::SchemaValidation { message },
            GradingError::Upstream { kind, message } => Self::Upstream { kind, message },
            GradingError::NotConfigured(message) => Self::Upstream {
                kind: UpstreamKind::Other,
                message,
            },
        }
    }
}

impl RubricError {
    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Creates a new `InsufficientCredits` error.
    #[must_use]
    pub fn insufficient_credits(user_id: impl Into<String>) -> Self {
        Self::InsufficientCredits {
            user_id: user_id.into(),
        }
    }

    /// Creates a new `RateLimited` error.
    #[must_use]
    pub fn rate_limited(client_key: impl Into<String>) -> Self {
        Self::RateLimited {
            client_key: client_key.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// HTTP status reported for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::InsufficientCredits { .. } => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::EmptySubmission { .. } => StatusCode::BAD_REQUEST,
            Self::SchemaValidation { .. }
            | Self::Upstream { .. }
            | Self::Store(_)
            | Self::ConfigParseError { .. }
            | Self::ConfigValidationError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short message safe to return to the client.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "Unauthorized",
            Self::InsufficientCredits { .. } => "Insufficient credits",
            Self::RateLimited { .. } => "Too many requests, please try again later",
            Self::NotFound { entity, .. } => match *entity {
                "exercise brief" => "Exercise brief not found",
                "user" => "User not found",
                _ => "Submission not found",
            },
            Self::EmptySubmission { .. } => "Submission has no response to grade",
            Self::SchemaValidation { .. } => "Grading output was malformed",
            Self::Upstream { .. } => "Grading service unavailable",
            Self::Store(_) | Self::ConfigParseError { .. } | Self::ConfigValidationError { .. } => {
                "Internal server error"
            }
        }
    }

    /// Returns `true` for admission rejections (auth, credits, rate, not found).
    ///
    /// Rejections are expected outcomes and are logged at `warn`; everything
    /// else is an internal failure logged at `error`.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized { .. }
                | Self::InsufficientCredits { .. }
                | Self::RateLimited { .. }
                | Self::NotFound { .. }
                | Self::EmptySubmission { .. }
        )
    }
}
