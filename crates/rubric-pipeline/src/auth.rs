//! Bearer-token authentication.
//!
//! Token issuance belongs to an external provider; the pipeline only asks a
//! [`TokenVerifier`] which user a token belongs to.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};

/// Resolves bearer tokens to user ids.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Returns the user id for a valid token, `None` otherwise.
    async fn verify(&self, token: &str) -> Option<String>;
}

/// Verifier backed by a fixed token → user table.
///
/// Meant for development and tests; production deployments plug in a
/// verifier for their identity provider.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    /// Creates a verifier from a token → user id table.
    #[must_use]
    pub const fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    /// Adds a token for `user_id`.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Option<String> {
        self.tokens.get(token).cloned()
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively. Returns `None` for a missing
/// header, another scheme, or an empty token.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc".into()));
        assert_eq!(bearer_token(&headers("bearer  abc ")), Some("abc".into()));
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&headers("Bearer")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_static_verifier() {
        let verifier = StaticTokenVerifier::default().with_token("t1", "u1");
        assert_eq!(verifier.verify("t1").await.as_deref(), Some("u1"));
        assert_eq!(verifier.verify("t2").await, None);
    }
}
