//! `OAuth2` grant flows used by mailbox connections.
//!
//! Only non-interactive grants are implemented: client credentials for
//! application identities and refresh-token exchange for delegated ones.

use crate::error::Result;
use crate::provider::Provider;
use crate::token::{ErrorResponse, Token, TokenResponse};
use reqwest::Client;
use tracing::debug;

/// Common `OAuth2` client configuration.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    /// Client ID from provider.
    pub client_id: String,
    /// Client secret (optional for public clients).
    pub client_secret: Option<String>,
    /// Provider configuration.
    pub provider: Provider,
    /// HTTP client.
    http_client: Client,
}

impl OAuthClient {
    /// Creates a new OAuth client.
    #[must_use]
    pub fn new(client_id: impl Into<String>, provider: Provider) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            provider,
            http_client: Client::new(),
        }
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Uses a preconfigured HTTP client (proxy, timeouts).
    #[must_use]
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }

    /// Obtains an application token with the client-credentials grant.
    ///
    /// When `scope` is `None` the provider's default scopes are requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the endpoint rejects it.
    pub async fn client_credentials(&self, scope: Option<&str>) -> Result<Token> {
        let scope = scope.map_or_else(|| self.provider.scope_string(), ToString::to_string);
        let mut params = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("scope", scope.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret));
        }

        debug!(provider = %self.provider.name, "requesting client credentials token");
        self.post_form(&params).await
    }

    /// Exchanges a refresh token for a new access token.
    ///
    /// The returned token keeps `refresh_token` when the server does not
    /// rotate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the endpoint rejects it.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Token> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret));
        }

        debug!(provider = %self.provider.name, "refreshing access token");
        let mut token = self.post_form(&params).await?;
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }
        Ok(token)
    }

    async fn post_form(&self, params: &[(&str, &str)]) -> Result<Token> {
        let response = self
            .http_client
            .post(self.provider.token_url.clone())
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = serde_json::from_str::<ErrorResponse>(&body).unwrap_or(ErrorResponse {
                error: status.canonical_reason().unwrap_or("unknown").to_string(),
                error_description: body,
            });
            return Err(error.into_error(status.as_u16()));
        }

        let token_response: TokenResponse = response.json().await?;
        Ok(Token::from_response(token_response))
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

    #[test]
    fn test_oauth_client_creation() {
        let provider = Provider::google().unwrap();
        let client = OAuthClient::new("test_client_id", provider);
        assert_eq!(client.client_id, "test_client_id");
        assert!(client.client_secret.is_none());
    }

    #[test]
    fn test_oauth_client_with_secret() {
        let provider = Provider::microsoft_tenant(crate::MICROSOFT_AUTHORITY, "t").unwrap();
        let client = OAuthClient::new("test_client_id", provider)
            .with_client_secret("secret")
            .with_http_client(Client::new());

        assert_eq!(client.client_secret.as_deref(), Some("secret"));
        assert_eq!(client.provider.name, "Microsoft");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_http_error() {
        let provider = Provider::new("Local", "http://127.0.0.1:9/token").unwrap();
        let client = OAuthClient::new("id", provider).with_client_secret("s");

        let err = client.client_credentials(None).await.unwrap_err();
        assert!(matches!(err, crate::Error::Http(_)));
        assert!(!err.is_config());
    }
}
