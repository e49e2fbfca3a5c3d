//! Error types for grading operations.

/// A specialized `Result` type for grading operations.
pub type Result<T> = std::result::Result<T, GradingError>;

/// Errors that can occur while grading a submission.
#[derive(Debug, thiserror::Error)]
pub enum GradingError {
    /// The completion service answered, but the output does not fit the
    /// result schema (missing or non-numeric score, malformed JSON, ...).
    #[error("Completion output failed schema validation: {message}")]
    SchemaValidation {
        /// What was wrong with the output.
        message: String,
    },

    /// The completion service could not be reached or returned an error.
    #[error("Completion service error ({kind}): {message}")]
    Upstream {
        /// Category of the failure.
        kind: UpstreamKind,
        /// Detail from the transport or the service.
        message: String,
    },

    /// The completion client is missing required configuration.
    #[error("Completion client not configured: {0}")]
    NotConfigured(String),
}

/// Categories of completion-service failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamKind {
    /// The service rejected our credentials (401/403).
    Authentication,
    /// The service throttled us (429).
    RateLimit,
    /// The service failed (5xx).
    Server,
    /// Connection-level failure.
    Network,
    /// The call exceeded the configured timeout.
    Timeout,
    /// The response envelope was not a chat completion.
    InvalidResponse,
    /// Anything else.
    Other,
}

impl std::fmt::Display for UpstreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::Timeout => write!(f, "timeout"),
            Self::InvalidResponse => write!(f, "invalid_response"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl GradingError {
    /// Creates a new `SchemaValidation` error.
    #[must_use]
    pub fn schema(message: impl Into<String>) -> Self {
        Self::SchemaValidation {
            message: message.into(),
        }
    }

    /// Creates a new `Upstream` error.
    #[must_use]
    pub fn upstream(kind: UpstreamKind, message: impl Into<String>) -> Self {
        Self::Upstream {
            kind,
            message: message.into(),
        }
    }

    /// Returns `true` for schema validation failures.
    #[must_use]
    pub const fn is_schema(&self) -> bool {
        matches!(self, Self::SchemaValidation { .. })
    }
}

impl From<reqwest::Error> for GradingError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            UpstreamKind::Timeout
        } else if err.is_connect() || err.is_request() {
            UpstreamKind::Network
        } else if err.is_decode() {
            UpstreamKind::InvalidResponse
        } else {
            UpstreamKind::Other
        };
        Self::upstream(kind, err.to_string())
    }
}
