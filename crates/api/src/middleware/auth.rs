//! Optional bearer API-key authentication

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::types::ErrorResponse;

/// Expected key, shared with the middleware
#[derive(Clone)]
pub struct ApiKey(pub Arc<str>);

impl ApiKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    /// Constant-time comparison against a presented key
    pub fn matches(&self, presented: &str) -> bool {
        self.0.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

/// Key presented as `Authorization: Bearer <key>` (scheme case-insensitive),
/// falling back to `x-api-key`
pub fn presented_key(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.trim().split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, key)| key.trim());

    bearer.or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(str::trim))
}

pub async fn require_api_key(State(key): State<ApiKey>, request: Request, next: Next) -> Response {
    match presented_key(request.headers()) {
        Some(presented) if key.matches(presented) => next.run(request).await,
        Some(_) => {
            warn!(uri = %request.uri(), "Rejected request with invalid API key");
            unauthorized("Invalid API key.")
        }
        None => {
            warn!(uri = %request.uri(), "Rejected request without API key");
            unauthorized("No API key provided.")
        }
    }
}

fn unauthorized(message: &str) -> Response {
    let mut response = ErrorResponse::reject(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message).into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presented_key_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(presented_key(&headers), None);

        headers.insert("x-api-key", HeaderValue::from_static("k1"));
        assert_eq!(presented_key(&headers), Some("k1"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer k2"));
        assert_eq!(presented_key(&headers), Some("k2"));

        // other schemes leave x-api-key usable
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(presented_key(&headers), Some("k1"));

        headers.remove("x-api-key");
        assert_eq!(presented_key(&headers), None);
    }

    #[test]
    fn test_bearer_scheme_is_case_insensitive() {
        for value in ["bearer secret", "BEARER secret", "BeArEr  secret"] {
            let mut headers = HeaderMap::new();
            headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
            assert_eq!(presented_key(&headers), Some("secret"), "{}", value);
        }
    }

    #[test]
    fn test_key_matching() {
        let key = ApiKey::new("secret");
        assert!(key.matches("secret"));
        assert!(!key.matches("secreT"));
        assert!(!key.matches("secret2"));
        assert!(!key.matches(""));
    }
}
