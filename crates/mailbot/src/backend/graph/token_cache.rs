//! Persisted Graph bearer token.
//!
//! The cache file holds `{ "access_token": ..., "issued_at": ... }`. A token
//! is usable until its JWT `exp` claim minus [`SAFETY_MARGIN`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use mailbot_oauth::{Token, jwt_expiry};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Tokens closer than this to expiry are treated as absent.
pub const SAFETY_MARGIN: Duration = Duration::minutes(5);

/// Bearer token with its derived expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    /// Bearer token.
    pub access_token: String,
    /// When the token was obtained; files holding only the raw token
    /// response are read as issued now.
    #[serde(default = "Utc::now")]
    pub issued_at: DateTime<Utc>,
    /// Expiry reported by the token endpoint, used when the token carries
    /// no readable `exp` claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("access_token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl From<Token> for CachedToken {
    fn from(token: Token) -> Self {
        Self {
            access_token: token.access_token,
            issued_at: token.issued_at,
            expires_at: token.expires_at,
        }
    }
}

impl CachedToken {
    /// Creates a token issued now.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            issued_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Expiry from the `exp` claim, else the recorded expiry.
    #[must_use]
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        jwt_expiry(&self.access_token).ok().or(self.expires_at)
    }

    /// Returns true if the token is usable at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry().is_some_and(|exp| now < exp - SAFETY_MARGIN)
    }
}

/// Token file; `None` disables persistence.
#[derive(Debug, Clone, Default)]
pub struct TokenCache {
    path: Option<PathBuf>,
}

impl TokenCache {
    /// Cache at `path`.
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Cache location.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Loads the cached token if it is still usable.
    ///
    /// Unreadable or malformed files count as an empty cache.
    pub async fn load(&self) -> Option<CachedToken> {
        let path = self.path.as_deref()?;
        let json = match tokio::fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no token cache");
                return None;
            }
        };
        let token: CachedToken = match serde_json::from_str(&json) {
            Ok(token) => token,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "error reading token file");
                return None;
            }
        };

        if token.is_valid_at(Utc::now()) {
            debug!("using cached token");
            Some(token)
        } else {
            debug!("token expired or about to expire");
            None
        }
    }

    /// Writes `token` to the cache file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub async fn store(&self, token: &CachedToken) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let json = serde_json::to_string(token)?;
        tokio::fs::write(path, json).await?;
        debug!(path = %path.display(), "token cached");
        Ok(())
    }
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
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    fn jwt(exp: DateTime<Utc>) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{}}}"#, exp.timestamp()));
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn test_margin() {
        let now = Utc::now();
        assert!(CachedToken::new(jwt(now + Duration::hours(1))).is_valid_at(now));
        assert!(!CachedToken::new(jwt(now + Duration::minutes(4))).is_valid_at(now));
        assert!(!CachedToken::new("opaque").is_valid_at(now));
    }

    #[test]
    fn test_recorded_expiry_for_opaque_tokens() {
        let now = Utc::now();
        let token = CachedToken {
            expires_at: Some(now + Duration::hours(1)),
            ..CachedToken::new("opaque")
        };
        assert!(token.is_valid_at(now));
    }

    #[tokio::test]
    async fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(Some(dir.path().join("token.json")));
        assert!(cache.load().await.is_none());

        let token = CachedToken::new(jwt(Utc::now() + Duration::hours(1)));
        cache.store(&token).await.unwrap();
        assert_eq!(cache.load().await.unwrap().access_token, token.access_token);

        let raw = std::fs::read_to_string(dir.path().join("token.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value.get("access_token").is_some());
        assert!(value.get("issued_at").is_some());
    }

    #[tokio::test]
    async fn test_expired_and_corrupt_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let cache = TokenCache::new(Some(path.clone()));

        cache
            .store(&CachedToken::new(jwt(Utc::now() + Duration::minutes(2))))
            .await
            .unwrap();
        assert!(cache.load().await.is_none());

        std::fs::write(&path, "not json").unwrap();
        assert!(cache.load().await.is_none());
    }

    #[tokio::test]
    async fn test_raw_token_response_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let access_token = jwt(Utc::now() + Duration::hours(1));
        let raw = serde_json::json!({
            "token_type": "Bearer",
            "expires_in": 3599,
            "access_token": access_token,
        });
        std::fs::write(&path, raw.to_string()).unwrap();

        let token = TokenCache::new(Some(path)).load().await.unwrap();
        assert_eq!(token.access_token, access_token);
        assert_eq!(token.expires_at, None);
    }

    #[tokio::test]
    async fn test_disabled_cache() {
        let cache = TokenCache::default();
        cache.store(&CachedToken::new("x")).await.unwrap();
        assert!(cache.load().await.is_none());
    }
}
