//! Declarative auth descriptors and their resolution into credentials.

use crate::error::{Error, Result};
use crate::flow::OAuthClient;
use crate::provider::{MICROSOFT_AUTHORITY, OUTLOOK_DEFAULT_SCOPE, Provider};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Auth block of a mailbox configuration.
///
/// The first usable shape wins, in field order: password, static token,
/// Microsoft client credentials, Google refresh token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthDescriptor {
    /// Login identity (always required).
    #[serde(default)]
    pub user: Option<String>,
    /// Plain password.
    #[serde(default, alias = "pass")]
    pub password: Option<String>,
    /// Static bearer token.
    #[serde(default, rename = "accessToken")]
    pub access_token: Option<String>,
    /// Microsoft client-credentials grant.
    #[serde(default)]
    pub msxoauth: Option<MsClientCredentials>,
    /// Google refresh-token grant.
    #[serde(default)]
    pub googlexoauth: Option<GoogleRefresh>,
}

/// Parameters of a Microsoft client-credentials exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsClientCredentials {
    /// Directory (tenant) ID.
    pub tenant_id: String,
    /// Application ID.
    pub client_id: String,
    /// Application secret.
    pub client_secret: String,
    /// Requested scope.
    #[serde(default = "default_outlook_scope")]
    pub scope: String,
}

fn default_outlook_scope() -> String {
    OUTLOOK_DEFAULT_SCOPE.to_string()
}

/// Parameters of a Google refresh-token exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleRefresh {
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Long-lived refresh token.
    pub refresh_token: String,
}

/// Secret half of a credential.
#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    /// Password for LOGIN.
    Password(String),
    /// Bearer token for XOAUTH2.
    Bearer(String),
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

/// Identity plus secret, ready for a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Login identity.
    pub identity: String,
    /// Password or bearer token.
    pub secret: Secret,
}

/// Resolves [`AuthDescriptor`]s, performing token exchanges when needed.
#[derive(Debug, Clone)]
pub struct Resolver {
    http_client: Client,
    authority: String,
    google: Option<Provider>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    /// Creates a resolver against the public Microsoft and Google endpoints.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http_client: Client::new(),
            authority: MICROSOFT_AUTHORITY.to_string(),
            google: None,
        }
    }

    /// Uses a preconfigured HTTP client for token exchanges.
    #[must_use]
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }

    /// Overrides the Microsoft authority host.
    #[must_use]
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    /// Overrides the Google token endpoint.
    #[must_use]
    pub fn with_google_provider(mut self, provider: Provider) -> Self {
        self.google = Some(provider);
        self
    }

    /// Turns a descriptor into a credential.
    ///
    /// Tokens obtained here are not cached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when `user` is missing or no
    /// credential shape is present, and an exchange error when a token
    /// endpoint fails.
    pub async fn resolve(&self, auth: &AuthDescriptor) -> Result<Credential> {
        let identity = auth
            .user
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::InvalidConfig("auth.user email is required".into()))?
            .to_string();

        if let Some(password) = auth.password.as_ref().filter(|p| !p.is_empty()) {
            debug!(user = %identity, "using password credential");
            return Ok(Credential {
                identity,
                secret: Secret::Password(password.clone()),
            });
        }

        if let Some(token) = auth.access_token.as_ref().filter(|t| !t.is_empty()) {
            debug!(user = %identity, "using static access token");
            return Ok(Credential {
                identity,
                secret: Secret::Bearer(token.clone()),
            });
        }

        if let Some(ms) = &auth.msxoauth {
            let provider = Provider::microsoft_tenant(&self.authority, &ms.tenant_id)?;
            let token = OAuthClient::new(&ms.client_id, provider)
                .with_client_secret(&ms.client_secret)
                .with_http_client(self.http_client.clone())
                .client_credentials(Some(&ms.scope))
                .await?;
            info!(user = %identity, "obtained Microsoft client credentials token");
            return Ok(Credential {
                identity,
                secret: Secret::Bearer(token.access_token),
            });
        }

        if let Some(google) = &auth.googlexoauth {
            let provider = match &self.google {
                Some(provider) => provider.clone(),
                None => Provider::google()?,
            };
            let token = OAuthClient::new(&google.client_id, provider)
                .with_client_secret(&google.client_secret)
                .with_http_client(self.http_client.clone())
                .refresh(&google.refresh_token)
                .await?;
            info!(user = %identity, "refreshed Google access token");
            return Ok(Credential {
                identity,
                secret: Secret::Bearer(token.access_token),
            });
        }

        Err(Error::InvalidConfig(
            "incorrect authentication credentials configuration".into(),
        ))
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

    fn descriptor(json: serde_json::Value) -> AuthDescriptor {
        serde_json::from_value(json).unwrap()
    }

    #[tokio::test]
    async fn test_missing_user_is_config_error() {
        let auth = descriptor(serde_json::json!({ "pass": "secret" }));
        let err = Resolver::new().resolve(&auth).await.unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_password_wins_over_token() {
        let auth = descriptor(serde_json::json!({
            "user": "bot@example.com",
            "pass": "hunter2",
            "accessToken": "tok"
        }));
        let credential = Resolver::new().resolve(&auth).await.unwrap();
        assert_eq!(credential.identity, "bot@example.com");
        assert_eq!(credential.secret, Secret::Password("hunter2".into()));
    }

    #[test]
    fn test_static_token() {
        let auth = descriptor(serde_json::json!({
            "user": "bot@example.com",
            "accessToken": "tok"
        }));
        let credential = tokio_test::block_on(Resolver::new().resolve(&auth)).unwrap();
        assert_eq!(credential.secret, Secret::Bearer("tok".into()));
    }

    #[tokio::test]
    async fn test_no_credential_shape_is_config_error() {
        let auth = descriptor(serde_json::json!({ "user": "bot@example.com" }));
        let err = Resolver::new().resolve(&auth).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_failed_exchange_is_not_config_error() {
        let auth = descriptor(serde_json::json!({
            "user": "bot@example.com",
            "msxoauth": {
                "tenant_id": "tenant",
                "client_id": "client",
                "client_secret": "secret"
            }
        }));
        let err = Resolver::new()
            .with_authority("http://127.0.0.1:9/")
            .resolve(&auth)
            .await
            .unwrap_err();
        assert!(!err.is_config());
    }

    #[test]
    fn test_msxoauth_default_scope() {
        let auth = descriptor(serde_json::json!({
            "user": "u",
            "msxoauth": { "tenant_id": "t", "client_id": "c", "client_secret": "s" }
        }));
        assert_eq!(auth.msxoauth.unwrap().scope, OUTLOOK_DEFAULT_SCOPE);
    }

    #[test]
    fn test_secret_debug_redacts() {
        let credential = Credential {
            identity: "u".into(),
            secret: Secret::Bearer("very-secret".into()),
        };
        assert!(!format!("{credential:?}").contains("very-secret"));
    }
}
