//! `OAuth2` token types and JWT expiry extraction.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// `OAuth2` access token with metadata.
#[derive(Clone, Serialize, Deserialize)]
pub struct Token {
    /// Access token string.
    pub access_token: String,
    /// Token type (usually "Bearer").
    pub token_type: String,
    /// When the token was obtained.
    pub issued_at: DateTime<Utc>,
    /// Expiration time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Refresh token for obtaining new access tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Scope granted by authorization server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl Token {
    /// Creates a new token issued now.
    #[must_use]
    pub fn new(access_token: impl Into<String>, token_type: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            issued_at: Utc::now(),
            expires_at: None,
            refresh_token: None,
            scope: None,
        }
    }

    /// Creates a token from a token endpoint response.
    ///
    /// Expiry comes from `expires_in` when present, otherwise from the
    /// token's own `exp` claim when it is a JWT.
    #[must_use]
    pub fn from_response(response: TokenResponse) -> Self {
        let issued_at = Utc::now();
        let expires_at = response
            .expires_in
            .map(|secs| issued_at + Duration::seconds(i64::from(secs)))
            .or_else(|| jwt_expiry(&response.access_token).ok());

        Self {
            access_token: response.access_token,
            token_type: response.token_type,
            issued_at,
            expires_at,
            refresh_token: response.refresh_token,
            scope: response.scope,
        }
    }

    /// Checks whether the token expires within `margin` of `now`.
    ///
    /// A token with unknown expiry is never considered expiring.
    #[must_use]
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now + margin >= exp)
    }

    /// Sets the expiration time.
    #[must_use]
    pub const fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Token response from `OAuth2` server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Token type.
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Expires in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u32>,
    /// Refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Error response from `OAuth2` server.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub error: String,
    /// Error description.
    #[serde(default)]
    pub error_description: String,
}

impl ErrorResponse {
    /// Converts to an exchange error for the given HTTP status.
    #[must_use]
    pub fn into_error(self, status: u16) -> Error {
        Error::exchange(status, self.error, self.error_description)
    }
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: i64,
}

/// Reads the `exp` claim of a JWT without verifying its signature.
///
/// # Errors
///
/// Returns an error if the token is not a three-part JWT, the payload is not
/// base64url JSON, or the `exp` claim is missing or out of range.
pub fn jwt_expiry(token: &str) -> Result<DateTime<Utc>> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_)) => payload,
        _ => return Err(Error::InvalidToken("not a JWT".into())),
    };

    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .or_else(|_| URL_SAFE.decode(payload))
        .map_err(|e| Error::InvalidToken(format!("payload is not base64url: {e}")))?;

    let claim: ExpiryClaim = serde_json::from_slice(&decoded)?;
    DateTime::from_timestamp(claim.exp, 0)
        .ok_or_else(|| Error::InvalidToken(format!("exp claim out of range: {}", claim.exp)))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    /// Builds an unsigned JWT whose payload carries the given claims.
    fn fake_jwt(claims: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.signature")
    }

    #[test]
    fn test_token_creation() {
        let token = Token::new("access123", "Bearer");
        assert_eq!(token.access_token, "access123");
        assert_eq!(token.token_type, "Bearer");
        assert!(token.expires_at.is_none());
        assert!(token.refresh_token.is_none());
    }

    #[test]
    fn test_token_debug_redacts_secret() {
        let token = Token::new("super-secret", "Bearer");
        let debug = format!("{token:?}");
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn test_expires_within_margin() {
        let now = Utc::now();
        let token = Token::new("t", "Bearer").with_expires_at(now + Duration::minutes(3));
        assert!(token.expires_within(Duration::minutes(5), now));
        assert!(!token.expires_within(Duration::minutes(1), now));

        let unknown = Token::new("t", "Bearer");
        assert!(!unknown.expires_within(Duration::minutes(5), now));
    }

    #[test]
    fn test_token_from_response_uses_expires_in() {
        let response = TokenResponse {
            access_token: "opaque".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: Some(3600),
            refresh_token: Some("refresh".to_string()),
            scope: None,
        };

        let token = Token::from_response(response);
        let remaining = token.expires_at.unwrap() - token.issued_at;
        assert_eq!(remaining, Duration::seconds(3600));
        assert_eq!(token.refresh_token.as_deref(), Some("refresh"));
    }

    #[test]
    fn test_token_from_response_falls_back_to_claims() {
        let jwt = fake_jwt(&serde_json::json!({ "exp": 4_102_444_800_i64 }));
        let response: TokenResponse =
            serde_json::from_value(serde_json::json!({ "access_token": jwt })).unwrap();

        let token = Token::from_response(response);
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expires_at.unwrap().timestamp(), 4_102_444_800);
    }

    #[test]
    fn test_jwt_expiry() {
        let jwt = fake_jwt(&serde_json::json!({ "exp": 1_700_000_000, "aud": "graph" }));
        assert_eq!(jwt_expiry(&jwt).unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_jwt_expiry_rejects_garbage() {
        assert!(matches!(jwt_expiry("opaque-token"), Err(Error::InvalidToken(_))));
        assert!(jwt_expiry("a.!!!.c").is_err());

        let no_exp = fake_jwt(&serde_json::json!({ "aud": "graph" }));
        assert!(matches!(jwt_expiry(&no_exp), Err(Error::Json(_))));
    }

    #[test]
    fn test_error_response_into_error() {
        let body: ErrorResponse = serde_json::from_str(
            r#"{"error":"invalid_client","error_description":"bad secret"}"#,
        )
        .unwrap();
        match body.into_error(401) {
            Error::Exchange { status, error, .. } => {
                assert_eq!(status, 401);
                assert_eq!(error, "invalid_client");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
